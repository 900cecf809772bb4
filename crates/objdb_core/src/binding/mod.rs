//! Read, write and observe a single property of keyed records.
//!
//! A binding is what a UI control talks to: it reads the current value,
//! writes a new one in its own transaction, and registers a callback for
//! changes. [`FlagBinding`] is the boolean `FeatureFlags` case.
//!
//! ```rust,ignore
//! let flags = FlagBinding::new(&store)?;
//! let _handle = flags.observe_flag("enableExperimentalFeature1", |value| {
//!     println!("toggle is now {value:?}");
//! })?;
//! flags.write_flag("enableExperimentalFeature1", true)?;
//! assert_eq!(flags.read_flag("enableExperimentalFeature1"), Some(true));
//! ```

pub mod feature_flags;

use crate::error::{CoreResult, SchemaError, StoreError};
use crate::logging::store_log;
use crate::observer::ObserverHandle;
use crate::store::Store;
use objdb_codec::{PrimaryKey, Value};

/// Binds one property of a record type.
#[derive(Clone)]
pub struct RecordBinding {
    store: Store,
    type_name: String,
    property: String,
}

impl RecordBinding {
    /// Binds `property` of `type_name`.
    ///
    /// # Errors
    ///
    /// `NoSuchType` for an unregistered type, `UnknownProperty` for an
    /// undeclared property, and `InvalidSchema` when `property` is the
    /// primary key.
    pub fn new(store: &Store, type_name: &str, property: &str) -> CoreResult<Self> {
        let ty = store.registry().resolve(type_name)?;
        if ty.property_type(property).is_none() {
            return Err(StoreError::unknown_property(type_name, property).into());
        }
        if ty.primary_key() == property {
            return Err(SchemaError::invalid_schema(
                type_name,
                format!("cannot bind primary key `{property}`"),
            )
            .into());
        }
        Ok(Self {
            store: store.clone(),
            type_name: ty.name().to_string(),
            property: property.to_string(),
        })
    }

    /// The bound type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The bound property.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// The bound store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current value of the property for `key`, or `None` if there is no
    /// such record.
    ///
    /// # Errors
    ///
    /// `StoreClosed` after the store is closed.
    pub fn read(&self, key: impl Into<PrimaryKey>) -> CoreResult<Option<Value>> {
        Ok(self
            .store
            .get(&self.type_name, key)?
            .and_then(|record| record.get(&self.property).cloned()))
    }

    /// Sets the property for `key` in a transaction of its own.
    ///
    /// # Errors
    ///
    /// `NoSuchRecord` if there is no record for `key`, `TypeMismatch` for a
    /// value of the wrong type, and the errors of
    /// [`Store::write`](crate::Store::write).
    pub fn write(&self, key: impl Into<PrimaryKey>, value: impl Into<Value>) -> CoreResult<()> {
        let key = key.into();
        let value = value.into();
        self.store.write(|tx| {
            let record = tx
                .find(&self.type_name, key.clone())?
                .ok_or_else(|| StoreError::no_such_record(&self.type_name, key.clone()))?;
            tx.update(&record, &self.property, value)
        })
    }

    /// Calls `callback` with the new value after every commit that changes
    /// the record for `key`; `None` once it is deleted.
    ///
    /// Notifications stop when the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// As for [`Store::observe`](crate::Store::observe).
    pub fn observe<F>(&self, key: impl Into<PrimaryKey>, callback: F) -> CoreResult<ObserverHandle>
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        let handle = self.store.observe(&self.type_name, key)?;
        let property = self.property.clone();
        handle.on_change(move |change| {
            callback(change.record().and_then(|r| r.get(&property).cloned()));
        });
        Ok(handle)
    }
}

impl std::fmt::Debug for RecordBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBinding")
            .field("type_name", &self.type_name)
            .field("property", &self.property)
            .finish_non_exhaustive()
    }
}

/// Binding for `FeatureFlags` records.
#[derive(Debug, Clone)]
pub struct FlagBinding {
    binding: RecordBinding,
}

impl FlagBinding {
    /// Binds the `value` property of `FeatureFlags`.
    ///
    /// # Errors
    ///
    /// `NoSuchType` if the store was opened without the
    /// [`feature_flags::schema`].
    pub fn new(store: &Store) -> CoreResult<Self> {
        Ok(Self {
            binding: RecordBinding::new(store, feature_flags::TYPE_NAME, feature_flags::VALUE)?,
        })
    }

    /// State of the flag `name`, or `None` if no such flag exists.
    ///
    /// Never fails: store errors are logged and reported as `None`.
    #[must_use]
    pub fn read_flag(&self, name: &str) -> Option<bool> {
        match self.binding.read(name) {
            Ok(value) => value.and_then(|v| v.as_bool()),
            Err(err) => {
                store_log!(
                    self.binding.store.inner.logger,
                    Warn,
                    Storage,
                    "reading flag {} failed: {}",
                    name,
                    err
                );
                None
            }
        }
    }

    /// Sets the flag `name`.
    ///
    /// # Errors
    ///
    /// `NoSuchRecord` if no such flag exists; the store is unchanged.
    pub fn write_flag(&self, name: &str, value: bool) -> CoreResult<()> {
        self.binding.write(name, value)
    }

    /// Inverts the flag `name` and returns its new state.
    ///
    /// # Errors
    ///
    /// `NoSuchRecord` if no such flag exists.
    pub fn toggle_flag(&self, name: &str) -> CoreResult<bool> {
        let binding = &self.binding;
        binding.store.write(|tx| {
            let record = tx
                .find(&binding.type_name, name)?
                .ok_or_else(|| StoreError::no_such_record(&binding.type_name, PrimaryKey::from(name)))?;
            let next = !record
                .get(&binding.property)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            tx.update(&record, &binding.property, next)?;
            Ok(next)
        })
    }

    /// Calls `callback` with the flag state after every change to `name`.
    ///
    /// # Errors
    ///
    /// As for [`Store::observe`](crate::Store::observe).
    pub fn observe_flag<F>(&self, name: &str, callback: F) -> CoreResult<ObserverHandle>
    where
        F: Fn(Option<bool>) + Send + Sync + 'static,
    {
        self.binding
            .observe(name, move |value| callback(value.and_then(|v| v.as_bool())))
    }

    /// All flags and their states, ordered by name.
    ///
    /// # Errors
    ///
    /// `StoreClosed` after the store is closed.
    pub fn flags(&self) -> CoreResult<Vec<(String, bool)>> {
        let records = self.binding.store.objects(&self.binding.type_name)?;
        Ok(records
            .iter()
            .filter_map(|r| {
                let name = r.key().to_value().as_str()?.to_string();
                let value = r.get(&self.binding.property)?.as_bool()?;
                Some((name, value))
            })
            .collect())
    }
}
