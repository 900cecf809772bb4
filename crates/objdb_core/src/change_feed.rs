//! Store-wide feed of committed record changes.
//!
//! Where an [`ObserverHandle`](crate::ObserverHandle) watches one record, the
//! change feed sees every committed change to every record, in commit order.
//! Events carry the generation of the commit that produced them, so a
//! consumer that falls behind can catch up with [`ChangeFeed::poll`].
//!
//! ```rust,ignore
//! let receiver = store.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = receiver.recv() {
//!         println!("{} {:?} {}", event.generation, event.change_type, event.key);
//!     }
//! });
//! ```

use crate::observer::RecordChange;
use crate::record::Record;
use crate::types::Generation;
use objdb_codec::PrimaryKey;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The record did not exist before.
    Insert,
    /// An existing record changed.
    Update,
    /// The record was removed.
    Delete,
}

/// One committed change to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Generation of the commit.
    pub generation: Generation,
    /// Type of the changed record.
    pub type_name: String,
    /// Key of the changed record.
    pub key: PrimaryKey,
    /// Kind of change.
    pub change_type: ChangeType,
    /// The record after the change. `None` for deletions.
    pub record: Option<Record>,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(generation: Generation, record: Record) -> Self {
        Self::with_record(generation, ChangeType::Insert, record)
    }

    /// Creates an update event.
    pub fn update(generation: Generation, record: Record) -> Self {
        Self::with_record(generation, ChangeType::Update, record)
    }

    /// Creates a delete event.
    pub fn delete(generation: Generation, type_name: impl Into<String>, key: PrimaryKey) -> Self {
        Self {
            generation,
            type_name: type_name.into(),
            key,
            change_type: ChangeType::Delete,
            record: None,
        }
    }

    fn with_record(generation: Generation, change_type: ChangeType, record: Record) -> Self {
        Self {
            generation,
            type_name: record.type_name().to_string(),
            key: record.key().clone(),
            change_type,
            record: Some(record),
        }
    }

    pub(crate) fn from_change(
        generation: Generation,
        type_name: &str,
        key: &PrimaryKey,
        change: &RecordChange,
    ) -> Self {
        match change {
            RecordChange::Created(record) => Self::insert(generation, record.clone()),
            RecordChange::Modified { record, .. } => Self::update(generation, record.clone()),
            RecordChange::Deleted => Self::delete(generation, type_name, key.clone()),
        }
    }
}

/// Distributes committed changes to subscribers and keeps a bounded history.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<VecDeque<ChangeEvent>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a feed that remembers at most `max_history` events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
        }
    }

    /// Returns a receiver for all future events.
    ///
    /// Events accumulate until received; drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes one event.
    pub fn emit(&self, event: ChangeEvent) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publishes the events of one commit, in order.
    pub fn emit_batch(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Returns up to `limit` remembered events newer than `after`.
    pub fn poll(&self, after: Generation, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.generation > after)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Generation of the newest remembered event.
    pub fn latest_generation(&self) -> Generation {
        self.history
            .read()
            .back()
            .map_or_else(Generation::default, |e| e.generation)
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of remembered events.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}
