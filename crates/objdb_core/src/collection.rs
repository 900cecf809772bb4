//! Collections and the committed snapshot they make up.

use crate::record::Record;
use crate::types::{CollectionId, Generation};
use objdb_codec::PrimaryKey;
use std::collections::HashMap;
use std::sync::Arc;

/// All records of one type, indexed by primary key.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    records: HashMap<PrimaryKey, Record>,
}

impl Collection {
    /// Looks up a record by key.
    #[must_use]
    pub fn get(&self, key: &PrimaryKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// Whether a record with `key` exists.
    #[must_use]
    pub fn contains(&self, key: &PrimaryKey) -> bool {
        self.records.contains_key(key)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over all records in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub(crate) fn insert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.key().clone(), record)
    }

    pub(crate) fn remove(&mut self, key: &PrimaryKey) -> Option<Record> {
        self.records.remove(key)
    }
}

/// An immutable view of the committed state at one generation.
///
/// Readers hold an `Arc<Snapshot>`; a commit builds the next snapshot by
/// cloning only the collections it touches and then swaps it in.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    collections: Vec<Arc<Collection>>,
    generation: Generation,
    bootstrapped: bool,
}

impl Snapshot {
    pub(crate) fn empty(collection_count: usize) -> Self {
        Self {
            collections: (0..collection_count)
                .map(|_| Arc::new(Collection::default()))
                .collect(),
            generation: Generation::default(),
            bootstrapped: false,
        }
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub(crate) fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(id.index()).map(Arc::as_ref)
    }

    pub(crate) fn get(&self, id: CollectionId, key: &PrimaryKey) -> Option<&Record> {
        self.collection(id).and_then(|c| c.get(key))
    }

    pub(crate) fn put(&mut self, id: CollectionId, record: Record) {
        if let Some(collection) = self.collections.get_mut(id.index()) {
            Arc::make_mut(collection).insert(record);
        }
    }

    pub(crate) fn remove(&mut self, id: CollectionId, key: &PrimaryKey) {
        if let Some(collection) = self.collections.get_mut(id.index()) {
            if collection.contains(key) {
                Arc::make_mut(collection).remove(key);
            }
        }
    }

    pub(crate) fn set_generation(&mut self, generation: Generation) {
        self.generation = generation;
    }

    pub(crate) fn mark_bootstrapped(&mut self) {
        self.bootstrapped = true;
    }
}
