//! Error types for ObjDB core.
//!
//! Errors are split the way callers handle them: [`SchemaError`] is raised
//! while registering types or opening a store, [`StoreError`] by record and
//! transaction operations, and everything that comes from the disk is a
//! [`CoreError`] of its own.

use objdb_codec::{PrimaryKey, PropertyType};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while validating or matching a schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two definitions share a type name.
    #[error("duplicate type name: {name}")]
    DuplicateTypeName {
        /// The repeated name.
        name: String,
    },

    /// The declared primary key is missing or has a non-indexable type.
    #[error("invalid primary key `{property}` on {type_name}: {reason}")]
    InvalidPrimaryKey {
        /// Type being registered.
        type_name: String,
        /// Name of the declared key property.
        property: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A definition is malformed in some other way.
    #[error("invalid definition of {type_name}: {reason}")]
    InvalidSchema {
        /// Type being registered.
        type_name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The store on disk was created with a different schema.
    #[error("schema mismatch: store has {stored}, opened with {requested}")]
    SchemaMismatch {
        /// Fingerprint recorded in the store.
        stored: String,
        /// Fingerprint of the schema passed to `open`.
        requested: String,
    },
}

impl SchemaError {
    /// Creates an invalid primary key error.
    pub fn invalid_primary_key(
        type_name: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPrimaryKey {
            type_name: type_name.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by record and transaction operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `create` with [`UpdateMode::Never`](crate::UpdateMode::Never) hit an
    /// existing key.
    #[error("{type_name} with key {key} already exists")]
    KeyAlreadyExists {
        /// Record type.
        type_name: String,
        /// The conflicting key.
        key: PrimaryKey,
    },

    /// The addressed record does not exist.
    #[error("no {type_name} with key {key}")]
    NoSuchRecord {
        /// Record type.
        type_name: String,
        /// The missing key.
        key: PrimaryKey,
    },

    /// The type name is not part of the registered schema.
    #[error("no such type: {type_name}")]
    NoSuchType {
        /// The unknown name.
        type_name: String,
    },

    /// The property is not declared by the record's type.
    #[error("{type_name} has no property `{property}`")]
    UnknownProperty {
        /// Record type.
        type_name: String,
        /// The undeclared property.
        property: String,
    },

    /// `create` was called without a value for the primary key.
    #[error("{type_name} requires a value for primary key `{property}`")]
    MissingPrimaryKey {
        /// Record type.
        type_name: String,
        /// The key property.
        property: String,
    },

    /// A value's tag does not match the declared property type.
    #[error("{type_name}.{property} expects {expected}, got {actual}")]
    TypeMismatch {
        /// Record type.
        type_name: String,
        /// The property being written.
        property: String,
        /// Declared type.
        expected: PropertyType,
        /// Type of the supplied value.
        actual: PropertyType,
    },

    /// An update tried to change a primary key.
    #[error("primary key {type_name}.{property} cannot be modified")]
    PrimaryKeyImmutable {
        /// Record type.
        type_name: String,
        /// The key property.
        property: String,
    },

    /// A property write on a record reference outside a write transaction.
    #[error("records are read-only outside a write transaction")]
    ReadOnlyOutsideTransaction,

    /// A mutation was attempted without an active write transaction.
    #[error("no active write transaction")]
    NoActiveTransaction,

    /// The calling thread already holds the write transaction.
    #[error("a write transaction is already active on this thread")]
    NestedTransaction,

    /// A write transaction was requested from inside change delivery.
    #[error("cannot begin a write transaction while changes are being delivered")]
    ReentrantWrite,

    /// Another writer holds the store and the caller chose not to wait.
    #[error("another write transaction is active")]
    WriteConflict,

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl StoreError {
    /// Creates a no such type error.
    pub fn no_such_type(type_name: impl Into<String>) -> Self {
        Self::NoSuchType {
            type_name: type_name.into(),
        }
    }

    /// Creates a no such record error.
    pub fn no_such_record(type_name: impl Into<String>, key: PrimaryKey) -> Self {
        Self::NoSuchRecord {
            type_name: type_name.into(),
            key,
        }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }
}

/// Errors that can occur in ObjDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema validation or matching failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A record or transaction operation was rejected.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] objdb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] objdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns the record-level error, if this is one.
    #[must_use]
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the schema error, if this is one.
    #[must_use]
    pub fn as_schema_error(&self) -> Option<&SchemaError> {
        match self {
            Self::Schema(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the error came from the disk rather than from the caller.
    #[must_use]
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::WalCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InvalidFormat { .. }
        )
    }
}
