//! Registry of live observer handles.

use super::handle::HandleShared;
use super::RecordChange;
use crate::types::CollectionId;
use objdb_codec::PrimaryKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

type WatchKey = (CollectionId, PrimaryKey);

/// Routes committed changes to the handles watching the changed keys.
///
/// The hub holds handles weakly; dropping an `ObserverHandle` is enough to
/// stop its notifications.
#[derive(Default)]
pub(crate) struct ObserverHub {
    handles: Mutex<HashMap<WatchKey, Vec<Weak<HandleShared>>>>,
}

impl ObserverHub {
    pub(crate) fn register(&self, shared: &Arc<HandleShared>) {
        self.handles
            .lock()
            .entry(shared.watch_key())
            .or_default()
            .push(Arc::downgrade(shared));
    }

    pub(crate) fn unregister(&self, shared: &HandleShared) {
        let key = shared.watch_key();
        let mut handles = self.handles.lock();
        if let Some(list) = handles.get_mut(&key) {
            list.retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), shared));
            if list.is_empty() {
                handles.remove(&key);
            }
        }
    }

    /// Delivers `changes` and returns how many notifications were made.
    ///
    /// Handles are collected under the lock and notified after it is
    /// released, so callbacks may create or drop handles.
    pub(crate) fn dispatch(&self, changes: &[(CollectionId, PrimaryKey, RecordChange)]) -> usize {
        let targets: Vec<(Arc<HandleShared>, &RecordChange)> = {
            let mut handles = self.handles.lock();
            changes
                .iter()
                .flat_map(|(id, key, change)| {
                    let live: Vec<_> = match handles.get_mut(&(*id, key.clone())) {
                        Some(list) => {
                            list.retain(|weak| weak.strong_count() > 0);
                            list.iter().filter_map(Weak::upgrade).collect()
                        }
                        None => Vec::new(),
                    };
                    live.into_iter().map(move |shared| (shared, change))
                })
                .collect()
        };

        targets
            .into_iter()
            .filter(|(shared, change)| shared.deliver(change))
            .count()
    }

    /// Closes every handle; used when the store shuts down.
    pub(crate) fn close(&self) {
        let all: Vec<_> = self.handles.lock().drain().flat_map(|(_, list)| list).collect();
        for shared in all.iter().filter_map(Weak::upgrade) {
            shared.close();
        }
    }

    /// Number of registered handles that are still alive.
    pub(crate) fn live_handles(&self) -> usize {
        self.handles
            .lock()
            .values()
            .flat_map(|list| list.iter())
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHub")
            .field("live_handles", &self.live_handles())
            .finish()
    }
}
