//! Staged state of the active write transaction.

use crate::collection::Snapshot;
use crate::record::Record;
use crate::types::{CollectionId, Generation, TransactionId};
use objdb_codec::PrimaryKey;
use std::collections::HashMap;

/// A write staged by the active transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    /// Insert or replace the record.
    Put(Record),
    /// Remove the record.
    Delete,
}

/// Writes staged by the active transaction, applied atomically on commit.
///
/// Each key appears once: a later write to the same key replaces the
/// earlier one, keeping the position of the first.
#[derive(Debug)]
pub(crate) struct Transaction {
    id: TransactionId,
    base: Generation,
    writes: HashMap<(CollectionId, PrimaryKey), PendingWrite>,
    order: Vec<(CollectionId, PrimaryKey)>,
    seeding: bool,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, base: Generation) -> Self {
        Self {
            id,
            base,
            writes: HashMap::new(),
            order: Vec::new(),
            seeding: false,
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    /// Generation the transaction started from.
    pub(crate) fn base(&self) -> Generation {
        self.base
    }

    /// Marks this as the bootstrap transaction.
    pub(crate) fn mark_seeding(&mut self) {
        self.seeding = true;
    }

    pub(crate) fn is_seeding(&self) -> bool {
        self.seeding
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn pending(&self, id: CollectionId, key: &PrimaryKey) -> Option<&PendingWrite> {
        self.writes.get(&(id, key.clone()))
    }

    /// The record under `key` as this transaction sees it.
    pub(crate) fn lookup<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        id: CollectionId,
        key: &PrimaryKey,
    ) -> Option<&'a Record> {
        match self.pending(id, key) {
            Some(PendingWrite::Put(record)) => Some(record),
            Some(PendingWrite::Delete) => None,
            None => snapshot.get(id, key),
        }
    }

    pub(crate) fn put(&mut self, id: CollectionId, record: Record) {
        let key = (id, record.key().clone());
        self.stage(key, PendingWrite::Put(record));
    }

    pub(crate) fn delete(&mut self, id: CollectionId, key: PrimaryKey) {
        self.stage((id, key), PendingWrite::Delete);
    }

    fn stage(&mut self, key: (CollectionId, PrimaryKey), write: PendingWrite) {
        if self.writes.insert(key.clone(), write).is_none() {
            self.order.push(key);
        }
    }

    /// Staged writes in first-touch order.
    pub(crate) fn writes(&self) -> impl Iterator<Item = (CollectionId, &PrimaryKey, &PendingWrite)> {
        self.order.iter().filter_map(move |key| {
            self.writes
                .get(key)
                .map(|write| (key.0, &key.1, write))
        })
    }

    /// Applies the staged writes on top of `base`.
    pub(crate) fn apply_to(&self, base: &Snapshot, generation: Generation) -> Snapshot {
        let mut next = base.clone();
        for (id, key, write) in self.writes() {
            match write {
                PendingWrite::Put(record) => next.put(id, record.clone()),
                PendingWrite::Delete => next.remove(id, key),
            }
        }
        if self.seeding {
            next.mark_bootstrapped();
        }
        next.set_generation(generation);
        next
    }
}
