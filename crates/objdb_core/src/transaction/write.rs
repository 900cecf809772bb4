//! The write transaction guard.

use crate::error::CoreResult;
use crate::record::{Record, UpdateMode};
use crate::reference::RecordRef;
use crate::store::Store;
use crate::types::{Generation, TransactionId};
use objdb_codec::{PrimaryKey, Value};
use std::marker::PhantomData;

/// The store's write transaction, held by one thread.
///
/// Writes are staged until [`commit`](Self::commit) and are visible only to
/// the owning thread until then. Dropping the guard without committing rolls
/// back.
///
/// The guard is tied to the thread that opened it and cannot be sent to
/// another.
pub struct WriteTransaction<'s> {
    store: &'s Store,
    id: TransactionId,
    finished: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<'s> WriteTransaction<'s> {
    pub(crate) fn new(store: &'s Store, id: TransactionId) -> Self {
        Self {
            store,
            id,
            finished: false,
            _thread_bound: PhantomData,
        }
    }

    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The store this transaction writes to.
    #[must_use]
    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Stages a record; see [`Store::create`].
    ///
    /// # Errors
    ///
    /// As for [`Store::create`].
    pub fn create<I, K>(&mut self, type_name: &str, values: I, mode: UpdateMode) -> CoreResult<RecordRef>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.store.create(type_name, values, mode)
    }

    /// Looks up a record, seeing this transaction's staged writes.
    ///
    /// # Errors
    ///
    /// As for [`Store::find`].
    pub fn find(&self, type_name: &str, key: impl Into<PrimaryKey>) -> CoreResult<Option<RecordRef>> {
        self.store.find(type_name, key)
    }

    /// Returns a copy of a record, seeing this transaction's staged writes.
    ///
    /// # Errors
    ///
    /// As for [`Store::get`].
    pub fn get(&self, type_name: &str, key: impl Into<PrimaryKey>) -> CoreResult<Option<Record>> {
        self.store.get(type_name, key)
    }

    /// All records of a type, seeing this transaction's staged writes.
    ///
    /// # Errors
    ///
    /// As for [`Store::objects`].
    pub fn objects(&self, type_name: &str) -> CoreResult<Vec<Record>> {
        self.store.objects(type_name)
    }

    /// Stages a property change; see [`Store::update`].
    ///
    /// # Errors
    ///
    /// As for [`Store::update`].
    pub fn update(&mut self, record: &RecordRef, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        record.set(property, value)
    }

    /// Stages the removal of a record.
    ///
    /// # Errors
    ///
    /// `NoSuchRecord` if the record does not exist.
    pub fn delete(&mut self, record: &RecordRef) -> CoreResult<()> {
        record.delete()
    }

    /// Makes all staged writes visible at once and notifies observers.
    ///
    /// Returns the generation of the commit. A transaction without writes
    /// leaves the generation unchanged.
    ///
    /// # Errors
    ///
    /// I/O errors while writing the WAL. The transaction is rolled back and
    /// the store keeps its previous state.
    pub fn commit(mut self) -> CoreResult<Generation> {
        self.finished = true;
        self.store.inner.commit_staged()
    }

    /// Discards all staged writes.
    pub fn rollback(mut self) {
        self.finished = true;
        self.store.inner.rollback_staged();
    }

    pub(crate) fn mark_seeding(&mut self) {
        self.store.inner.mark_seeding();
    }

    /// Whether this is the first-open seed transaction.
    #[must_use]
    pub fn is_seeding(&self) -> bool {
        self.store.inner.is_seeding()
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.inner.rollback_staged();
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
