//! # ObjDB Core
//!
//! Embedded single-writer object store with observable records.
//!
//! This crate provides:
//! - A schema registry of typed, primary-keyed object types
//! - Record create / find / update / delete inside write transactions
//! - A single writer with first-come, first-served waiting, and readers
//!   that never block
//! - A write-ahead log, checkpoint images and crash recovery
//! - A one-time bootstrap seed per store lifetime
//! - Observer handles on single records and a store-wide change feed
//! - Bindings that expose one property of a record as a value to read,
//!   write and watch
//!
//! ```rust,ignore
//! use objdb_core::{feature_flags, FlagBinding, Store};
//!
//! let store = Store::open(
//!     [feature_flags::schema()],
//!     "./data/flags",
//!     |tx| feature_flags::seed(tx, ["enableExperimentalFeature1"]),
//! )?;
//! let flags = FlagBinding::new(&store)?;
//! assert_eq!(flags.read_flag("enableExperimentalFeature1"), Some(false));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod bootstrap;
mod builder;
mod change_feed;
mod checkpoint;
mod collection;
mod config;
mod dir;
mod error;
mod logging;
mod manifest;
mod observer;
mod record;
mod reference;
mod schema;
mod stats;
mod store;
mod transaction;
mod types;
mod wal;

pub use binding::{feature_flags, FlagBinding, RecordBinding};
pub use bootstrap::run_if_first_open;
pub use builder::StoreBuilder;
pub use change_feed::{ChangeEvent, ChangeFeed, ChangeType};
pub use checkpoint::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use collection::Collection;
pub use config::{Config, WritePolicy};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult, SchemaError, StoreError};
pub use logging::{LogCategory, LogLevel, LogSink};
pub use manifest::{Manifest, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use observer::{HandleState, ObserverHandle, RecordChange, SubscriptionId};
pub use record::{Record, UpdateMode};
pub use reference::RecordRef;
pub use schema::{Fingerprint, ObjectType, PropertyDef, SchemaDefinition, SchemaRegistry};
pub use stats::StatsSnapshot;
pub use store::Store;
pub use transaction::WriteTransaction;
pub use types::{CollectionId, Generation, TransactionId};
pub use wal::{compute_crc32, WalRecord, WalRecordIterator, WalRecordType, WalScan, WAL_MAGIC, WAL_VERSION};

pub use objdb_codec::{PrimaryKey, PropertyType, Value};
