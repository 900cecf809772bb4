//! Non-owning references to records.

use crate::error::{CoreResult, StoreError};
use crate::observer::ObserverHandle;
use crate::record::Record;
use crate::store::StoreInner;
use crate::types::CollectionId;
use objdb_codec::{PrimaryKey, Value};
use std::fmt;
use std::sync::{Arc, Weak};

/// Points at one record by type and primary key.
///
/// A `RecordRef` holds no data: every read resolves the key again, so it
/// always reflects the latest state visible to the calling thread. It
/// stays valid across commits and becomes dangling, not invalid, when the
/// record is deleted.
#[derive(Clone)]
pub struct RecordRef {
    store: Weak<StoreInner>,
    collection: CollectionId,
    type_name: String,
    key: PrimaryKey,
}

impl RecordRef {
    pub(crate) fn new(store: &Arc<StoreInner>, collection: CollectionId, type_name: &str, key: PrimaryKey) -> Self {
        Self {
            store: Arc::downgrade(store),
            collection,
            type_name: type_name.to_string(),
            key,
        }
    }

    fn store(&self) -> Result<Arc<StoreInner>, StoreError> {
        self.store.upgrade().ok_or(StoreError::StoreClosed)
    }

    /// The record's type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The record's primary key.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Whether the record currently exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.record().is_some()
    }

    /// A copy of the record, or `None` if it no longer exists or the store
    /// is closed.
    #[must_use]
    pub fn record(&self) -> Option<Record> {
        let store = self.store.upgrade()?;
        store.lookup(self.collection, &self.key).ok().flatten()
    }

    /// The current value of one property.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<Value> {
        self.record()?.get(property).cloned()
    }

    /// Stages a property change. Requires the write transaction.
    ///
    /// # Errors
    ///
    /// As for [`Store::update`](crate::Store::update).
    pub fn set(&self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.store()?
            .stage_update(self.collection, &self.key, property, value.into())
    }

    /// Stages the removal of the record. Requires the write transaction.
    ///
    /// # Errors
    ///
    /// As for [`Store::delete`](crate::Store::delete).
    pub fn delete(&self) -> CoreResult<()> {
        self.store()?.stage_delete(self.collection, &self.key)
    }

    /// Returns a handle observing this record.
    ///
    /// # Errors
    ///
    /// `StoreClosed` if the store has been closed.
    pub fn observe(&self) -> CoreResult<ObserverHandle> {
        let store = self.store()?;
        if store.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(StoreError::StoreClosed.into());
        }
        Ok(ObserverHandle::register(
            &store,
            self.collection,
            &self.type_name,
            self.key.clone(),
        ))
    }
}

impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
            && self.key == other.key
            && Weak::ptr_eq(&self.store, &other.store)
    }
}

impl Eq for RecordRef {}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordRef")
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.key)
    }
}
