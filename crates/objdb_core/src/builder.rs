//! Opening stores and recovering their state.

use crate::bootstrap;
use crate::change_feed::ChangeFeed;
use crate::checkpoint::SnapshotImage;
use crate::collection::Snapshot;
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::logging::{store_log, StoreLogger};
use crate::manifest::Manifest;
use crate::observer::ObserverHub;
use crate::record::Record;
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::stats::StoreStats;
use crate::store::{Store, StoreInner};
use crate::transaction::{Transaction, TransactionManager, WriteTransaction};
use crate::wal::{WalManager, WalRecord};
use objdb_codec::Value;
use objdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

type SeedFn = Box<dyn FnOnce(&mut WriteTransaction<'_>) -> CoreResult<()> + Send>;

enum Location {
    Memory,
    Directory(PathBuf),
    Backends {
        wal: Box<dyn StorageBackend>,
        images: Box<dyn StorageBackend>,
    },
}

/// Configures and opens a [`Store`].
///
/// ```rust,ignore
/// let store = Store::builder([feature_flags::schema()])
///     .path("./data/flags")
///     .config(Config::default().sync_on_commit(false))
///     .on_first_open(|tx| feature_flags::seed(tx, ["enableExperimentalFeature1"]))
///     .open()?;
/// ```
pub struct StoreBuilder {
    /// `None` reads the schema from the manifest.
    definitions: Option<Vec<SchemaDefinition>>,
    location: Location,
    config: Config,
    seed: Option<SeedFn>,
}

impl StoreBuilder {
    pub(crate) fn new<I>(schemas: I) -> Self
    where
        I: IntoIterator<Item = SchemaDefinition>,
    {
        Self {
            definitions: Some(schemas.into_iter().collect()),
            location: Location::Memory,
            config: Config::default(),
            seed: None,
        }
    }

    pub(crate) fn from_manifest() -> Self {
        Self {
            definitions: None,
            location: Location::Memory,
            config: Config::default(),
            seed: None,
        }
    }

    /// Persists the store in the directory `path`.
    #[must_use]
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.location = Location::Directory(path.as_ref().to_path_buf());
        self
    }

    /// Keeps the store in memory (the default).
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.location = Location::Memory;
        self
    }

    /// Uses caller-provided storage for the WAL and checkpoint image.
    ///
    /// No manifest is kept; the bootstrap flag lives in the WAL and image.
    #[must_use]
    pub fn backends(mut self, wal: Box<dyn StorageBackend>, images: Box<dyn StorageBackend>) -> Self {
        self.location = Location::Backends { wal, images };
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the function that seeds the store on its first open.
    #[must_use]
    pub fn on_first_open<F>(mut self, seed: F) -> Self
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<()> + Send + 'static,
    {
        self.seed = Some(Box::new(seed));
        self
    }

    /// Opens the store: validates the schema, recovers committed state and
    /// runs the seed if the store has never been bootstrapped.
    ///
    /// # Errors
    ///
    /// - schema validation errors, or `SchemaMismatch` against the manifest
    /// - `StoreLocked` if another process has the directory open
    /// - `InvalidFormat`, `WalCorruption` or `ChecksumMismatch` for damaged
    ///   files
    /// - I/O errors
    /// - the error returned by the seed
    pub fn open(self) -> CoreResult<Store> {
        let Self {
            definitions,
            location,
            config,
            seed,
        } = self;
        let logger = StoreLogger::new(config.log_level, config.log_sink.clone());

        let (registry, dir, manifest, wal_backend, image_backend, label) = match location {
            Location::Directory(path) => {
                let dir = StoreDir::open(&path, config.create_if_missing)?;
                let stored = dir.load_manifest()?;
                let registry = match (definitions, &stored) {
                    (Some(defs), _) => SchemaRegistry::register(defs)?,
                    (None, Some(manifest)) => manifest.registry()?,
                    (None, None) => {
                        return Err(CoreError::invalid_format(format!(
                            "no store found at {}",
                            path.display()
                        )))
                    }
                };
                let manifest = match stored {
                    Some(manifest) => {
                        manifest.check(config.format_version, &registry)?;
                        manifest
                    }
                    None => {
                        let manifest = Manifest::new(config.format_version, &registry);
                        dir.save_manifest(&manifest)?;
                        store_log!(
                            logger,
                            Info,
                            Storage,
                            "created store at {} (schema {})",
                            path.display(),
                            registry.fingerprint()
                        );
                        manifest
                    }
                };
                let wal: Box<dyn StorageBackend> =
                    Box::new(FileBackend::open_with_create_dirs(&dir.wal_path())?);
                let images: Box<dyn StorageBackend> =
                    Box::new(FileBackend::open_with_create_dirs(&dir.snapshot_path())?);
                let label = path.display().to_string();
                (registry, Some(dir), manifest, wal, images, label)
            }
            Location::Memory => {
                let registry = Self::require_schema(definitions)?;
                let manifest = Manifest::new(config.format_version, &registry);
                let wal: Box<dyn StorageBackend> = Box::new(InMemoryBackend::new());
                let images: Box<dyn StorageBackend> = Box::new(InMemoryBackend::new());
                (registry, None, manifest, wal, images, "memory".to_string())
            }
            Location::Backends { wal, images } => {
                let registry = Self::require_schema(definitions)?;
                let manifest = Manifest::new(config.format_version, &registry);
                (registry, None, manifest, wal, images, "custom backends".to_string())
            }
        };

        let wal = WalManager::new(wal_backend, config.sync_on_commit);
        let (snapshot, next_txid) = recover(&registry, &wal, image_backend.as_ref(), &logger)?;
        store_log!(
            logger,
            Info,
            Storage,
            "opened {} at {} ({} types)",
            label,
            snapshot.generation(),
            registry.len()
        );

        let inner = Arc::new(StoreInner {
            changes: ChangeFeed::with_max_history(config.change_history),
            registry,
            logger,
            label,
            dir: Mutex::new(dir),
            manifest: Mutex::new(manifest),
            wal,
            images: Mutex::new(image_backend),
            committed: RwLock::new(Arc::new(snapshot)),
            staged: Mutex::new(None),
            transactions: TransactionManager::new(next_txid),
            observers: ObserverHub::default(),
            stats: StoreStats::default(),
            closed: AtomicBool::new(false),
            config,
        });
        let store = Store::from_inner(inner);

        bootstrap::run_if_first_open(&store, |tx| match seed {
            Some(seed) => seed(tx),
            None => Ok(()),
        })?;
        Ok(store)
    }

    fn require_schema(definitions: Option<Vec<SchemaDefinition>>) -> CoreResult<SchemaRegistry> {
        match definitions {
            Some(defs) => Ok(SchemaRegistry::register(defs)?),
            None => Err(CoreError::invalid_format("a store without a directory needs a schema")),
        }
    }
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = match &self.location {
            Location::Memory => "memory".to_string(),
            Location::Directory(path) => path.display().to_string(),
            Location::Backends { .. } => "custom backends".to_string(),
        };
        f.debug_struct("StoreBuilder")
            .field("types", &self.definitions.as_ref().map(Vec::len))
            .field("location", &location)
            .field("config", &self.config)
            .field("seed", &self.seed.is_some())
            .finish()
    }
}

/// Rebuilds the committed state from the checkpoint image and the WAL.
///
/// Transactions without a `Commit` record are ignored, as are commits
/// already contained in the image. A torn record at the end of the WAL is
/// cut off. Returns the snapshot and the next transaction id.
fn recover(
    registry: &SchemaRegistry,
    wal: &WalManager,
    images: &dyn StorageBackend,
    logger: &StoreLogger,
) -> CoreResult<(Snapshot, u64)> {
    let image = images.read_all()?;
    let mut snapshot = if image.is_empty() {
        Snapshot::empty(registry.len())
    } else {
        let image = SnapshotImage::decode(&image)?;
        store_log!(logger, Debug, Storage, "restoring checkpoint image at {}", image.generation());
        image.restore(registry)?
    };
    let image_generation = snapshot.generation();

    let scan = wal.scan()?;
    if scan.torn_tail {
        store_log!(
            logger,
            Warn,
            Storage,
            "discarding incomplete WAL record after {} bytes",
            scan.valid_len
        );
        wal.truncate(scan.valid_len)?;
    }

    let mut max_txid = 0u64;
    let mut open: Option<Transaction> = None;
    let mut replayed = 0usize;

    for (offset, record) in scan.records {
        if let Some(txid) = record.txid() {
            max_txid = max_txid.max(txid.as_u64());
        }
        match record {
            WalRecord::Begin { txid } => {
                open = Some(Transaction::new(txid, snapshot.generation()));
            }
            WalRecord::Put {
                txid,
                collection_id,
                key,
                properties,
            } => {
                if let Some(txn) = open.as_mut().filter(|t| t.id() == txid) {
                    let ty = registry.by_id(collection_id).ok_or_else(|| {
                        CoreError::wal_corruption(format!(
                            "record at offset {offset} names unknown {collection_id}"
                        ))
                    })?;
                    let properties: BTreeMap<String, Value> = objdb_codec::from_cbor(&properties)?;
                    txn.put(collection_id, Record::new(ty.name(), key, properties));
                }
            }
            WalRecord::Delete {
                txid,
                collection_id,
                key,
            } => {
                if let Some(txn) = open.as_mut().filter(|t| t.id() == txid) {
                    txn.delete(collection_id, key);
                }
            }
            WalRecord::Bootstrapped { txid } => {
                if let Some(txn) = open.as_mut().filter(|t| t.id() == txid) {
                    txn.mark_seeding();
                }
            }
            WalRecord::Commit { txid, generation } => {
                if let Some(txn) = open.take().filter(|t| t.id() == txid) {
                    if generation > snapshot.generation() {
                        snapshot = txn.apply_to(&snapshot, generation);
                        replayed += 1;
                    }
                }
            }
            WalRecord::Checkpoint { .. } => {}
        }
    }

    if open.is_some() {
        store_log!(logger, Warn, Storage, "ignoring uncommitted transaction at end of WAL");
    }
    if replayed > 0 {
        store_log!(
            logger,
            Info,
            Storage,
            "replayed {} transactions from {} to {}",
            replayed,
            image_generation,
            snapshot.generation()
        );
    }

    Ok((snapshot, max_txid + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::record::UpdateMode;
    use objdb_codec::PropertyType;
    use tempfile::tempdir;

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Bool)
    }

    fn set_flag(store: &Store, name: &str, value: bool) {
        store
            .write(|tx| {
                tx.create(
                    "FeatureFlags",
                    [("name", Value::from(name)), ("value", Value::Bool(value))],
                    UpdateMode::All,
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn committed_records_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            set_flag(&store, "a", true);
            set_flag(&store, "b", false);
            store.close().unwrap();
        }

        let store = Store::builder([flags()]).path(&path).open().unwrap();
        assert_eq!(store.count("FeatureFlags").unwrap(), 2);
        let a = store.get("FeatureFlags", "a").unwrap().unwrap();
        assert_eq!(a.get("value"), Some(&Value::Bool(true)));
        assert_eq!(store.generation().as_u64(), 3);
    }

    #[test]
    fn recovery_without_close() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            set_flag(&store, "a", true);
            // Dropping the store releases the lock; the WAL holds the data.
        }

        let store = Store::builder([flags()]).path(&path).open().unwrap();
        assert!(store.find("FeatureFlags", "a").unwrap().is_some());
    }

    #[test]
    fn checkpoint_then_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            set_flag(&store, "a", true);
            store.checkpoint().unwrap();
            set_flag(&store, "b", true);
            assert_eq!(store.stats().checkpoints, 1);
        }

        let store = Store::builder([flags()]).path(&path).open().unwrap();
        assert_eq!(store.count("FeatureFlags").unwrap(), 2);
        assert!(store.is_bootstrapped());
    }

    #[test]
    fn schema_change_is_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        Store::builder([flags()]).path(&path).open().unwrap().close().unwrap();

        let changed = flags().property("description", PropertyType::String);
        let err = Store::builder([changed]).path(&path).open().unwrap_err();
        assert!(matches!(
            err.as_schema_error(),
            Some(SchemaError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        let _first = Store::builder([flags()]).path(&path).open().unwrap();

        let err = Store::builder([flags()]).path(&path).open().unwrap_err();
        assert!(matches!(err, CoreError::StoreLocked));
    }

    #[test]
    fn open_existing_reads_schema_from_manifest() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            set_flag(&store, "a", true);
        }

        let store = Store::open_existing(&path).unwrap();
        assert!(store.registry().get("FeatureFlags").is_some());
        assert_eq!(store.count("FeatureFlags").unwrap(), 1);

        let missing = temp.path().join("missing");
        assert!(matches!(
            Store::open_existing(&missing),
            Err(CoreError::InvalidFormat { .. })
        ));
        assert!(!missing.exists());
    }

    #[test]
    fn torn_wal_tail_is_discarded() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            set_flag(&store, "a", true);
        }

        let wal_path = path.join("wal.log");
        let mut bytes = std::fs::read(&wal_path).unwrap();
        let good = bytes.len();
        bytes.extend_from_slice(b"OWAL\x01\x00");
        std::fs::write(&wal_path, &bytes).unwrap();

        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            assert!(store.find("FeatureFlags", "a").unwrap().is_some());
        }
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len() as usize, good);
    }

    #[test]
    fn damaged_length_in_middle_record_fails_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let store = Store::builder([flags()]).path(&path).open().unwrap();
            set_flag(&store, "a", true);
            set_flag(&store, "b", true);
            set_flag(&store, "c", true);
        }

        let wal_path = path.join("wal.log");
        let mut bytes = std::fs::read(&wal_path).unwrap();
        let offsets: Vec<u64> = crate::wal::WalRecordIterator::new(&bytes)
            .map(|item| item.unwrap().0)
            .collect();
        assert!(offsets.len() > 6);

        // High byte of the fourth record's length field.
        let target = offsets[3] as usize + 10;
        bytes[target] = 0x7f;
        std::fs::write(&wal_path, &bytes).unwrap();

        let err = Store::builder([flags()]).path(&path).open().unwrap_err();
        assert!(err.is_io_failure());
        assert!(matches!(err, CoreError::WalCorruption { .. }));
        assert_eq!(std::fs::read(&wal_path).unwrap(), bytes);
    }

    #[test]
    fn memory_store_needs_schema() {
        assert!(matches!(
            StoreBuilder::from_manifest().open(),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
