//! Observer handles.

use super::{HandleState, RecordChange, SubscriptionId};
use crate::error::{CoreResult, StoreError};
use crate::record::Record;
use crate::store::StoreInner;
use crate::types::CollectionId;
use objdb_codec::{PrimaryKey, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};

type Callback = Arc<dyn Fn(&RecordChange) + Send + Sync>;

/// State shared between a handle and the hub.
pub(crate) struct HandleShared {
    collection: CollectionId,
    type_name: String,
    key: PrimaryKey,
    state: Mutex<HandleState>,
    callbacks: Mutex<Vec<(SubscriptionId, Callback)>>,
    channels: Mutex<Vec<Sender<RecordChange>>>,
    next_subscription: AtomicU64,
}

impl HandleShared {
    pub(crate) fn watch_key(&self) -> (CollectionId, PrimaryKey) {
        (self.collection, self.key.clone())
    }

    fn state(&self) -> HandleState {
        *self.state.lock()
    }

    /// Records whether the target exists, unless the handle is closed.
    fn bind(&self, present: bool) {
        let mut state = self.state.lock();
        if *state != HandleState::Closed {
            *state = if present {
                HandleState::Bound
            } else {
                HandleState::Deleted
            };
        }
    }

    /// Notifies callbacks and channels. Returns `false` if the handle is
    /// closed.
    pub(crate) fn deliver(&self, change: &RecordChange) -> bool {
        if self.state() == HandleState::Closed {
            return false;
        }
        self.bind(!change.is_deletion());

        let callbacks: Vec<Callback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(change);
        }

        self.channels
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
        true
    }

    pub(crate) fn close(&self) {
        *self.state.lock() = HandleState::Closed;
        self.callbacks.lock().clear();
        self.channels.lock().clear();
    }
}

/// A live view of one record, identified by type and primary key.
///
/// The handle does not keep the record alive and does not keep the store
/// open. It is notified once per commit that changes the record, and stops
/// receiving notifications when it is dropped or the store is closed.
///
/// # Example
///
/// ```rust,ignore
/// let handle = store.observe("FeatureFlags", "enableExperimentalFeature1")?;
/// let changes = handle.changes();
/// store.write(|tx| tx.create("FeatureFlags", values, UpdateMode::Modified).map(|_| ()))?;
/// assert!(changes.try_recv().is_ok());
/// ```
pub struct ObserverHandle {
    shared: Arc<HandleShared>,
    store: Weak<StoreInner>,
}

impl ObserverHandle {
    pub(crate) fn register(store: &Arc<StoreInner>, collection: CollectionId, type_name: &str, key: PrimaryKey) -> Self {
        let shared = Arc::new(HandleShared {
            collection,
            type_name: type_name.to_string(),
            key,
            state: Mutex::new(HandleState::Unbound),
            callbacks: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        });
        store.observers().register(&shared);
        Self {
            shared,
            store: Arc::downgrade(store),
        }
    }

    /// The watched type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.shared.type_name
    }

    /// The watched key.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        &self.shared.key
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    /// Whether the handle will receive no further notifications.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == HandleState::Closed
    }

    /// The latest state of the record as seen from the calling thread, or
    /// `None` if it does not exist or the handle is closed.
    ///
    /// On the writer thread this includes staged writes, but the handle
    /// state only follows committed data.
    #[must_use]
    pub fn current(&self) -> Option<Record> {
        if self.is_closed() {
            return None;
        }
        let store = self.store.upgrade()?;
        let record = store.lookup(self.shared.collection, &self.shared.key).ok()?;
        self.shared
            .bind(store.is_committed(self.shared.collection, &self.shared.key));
        record
    }

    /// Registers a callback invoked with every change to the record.
    ///
    /// Callbacks run on the committing thread while the write slot is still
    /// held; starting a write transaction from one fails with
    /// `ReentrantWrite`.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RecordChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        if !self.is_closed() {
            self.shared.callbacks.lock().push((id, Arc::new(callback)));
        }
        id
    }

    /// Removes a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.shared.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != id);
        callbacks.len() != before
    }

    /// Returns a channel that receives every future change.
    ///
    /// The channel disconnects when the handle is dropped or closed.
    #[must_use]
    pub fn changes(&self) -> Receiver<RecordChange> {
        let (tx, rx) = mpsc::channel();
        if !self.is_closed() {
            self.shared.channels.lock().push(tx);
        }
        rx
    }

    /// Stages a property write on the watched record.
    ///
    /// # Errors
    ///
    /// `ReadOnlyOutsideTransaction` without an active write transaction on
    /// this thread, `NoSuchRecord` if the record does not exist, and the
    /// validation errors of [`Store::update`](crate::Store::update).
    pub fn set(&self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        let store = self.store.upgrade().ok_or(StoreError::StoreClosed)?;
        store.stage_update(
            self.shared.collection,
            &self.shared.key,
            property,
            value.into(),
        )
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.shared.close();
        if let Some(store) = self.store.upgrade() {
            store.observers().unregister(&self.shared);
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("type_name", &self.shared.type_name)
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
