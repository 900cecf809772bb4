//! Store facade and commit pipeline.

use crate::builder::StoreBuilder;
use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::checkpoint::SnapshotImage;
use crate::collection::{Collection, Snapshot};
use crate::config::{Config, WritePolicy};
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult, StoreError};
use crate::logging::{store_log, StoreLogger};
use crate::manifest::Manifest;
use crate::observer::{ObserverHandle, ObserverHub, RecordChange};
use crate::record::{Record, RecordInput, UpdateMode};
use crate::reference::RecordRef;
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::transaction::{Acquire, PendingWrite, SlotGuard, Transaction, TransactionManager, WriteTransaction};
use crate::types::{CollectionId, Generation, TransactionId};
use crate::wal::{WalManager, WalRecord};
use objdb_codec::{PrimaryKey, Value};
use objdb_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// Shared state behind every [`Store`] clone.
pub(crate) struct StoreInner {
    pub(crate) registry: SchemaRegistry,
    pub(crate) config: Config,
    pub(crate) logger: StoreLogger,
    pub(crate) label: String,
    pub(crate) dir: Mutex<Option<StoreDir>>,
    pub(crate) manifest: Mutex<Manifest>,
    pub(crate) wal: WalManager,
    pub(crate) images: Mutex<Box<dyn StorageBackend>>,
    pub(crate) committed: RwLock<Arc<Snapshot>>,
    pub(crate) staged: Mutex<Option<Transaction>>,
    pub(crate) transactions: TransactionManager,
    pub(crate) observers: ObserverHub,
    pub(crate) changes: ChangeFeed,
    pub(crate) stats: StoreStats,
    pub(crate) closed: AtomicBool,
}

impl StoreInner {
    pub(crate) fn observers(&self) -> &ObserverHub {
        &self.observers
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.committed.read())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::StoreClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_bootstrapped(&self) -> bool {
        self.snapshot().bootstrapped() || self.manifest.lock().bootstrapped
    }

    /// The record under `key` as the calling thread sees it: the staged
    /// state for the writer, the committed snapshot for everyone else.
    pub(crate) fn lookup(&self, id: CollectionId, key: &PrimaryKey) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        let snapshot = self.snapshot();
        if self.transactions.is_writer() {
            if let Some(txn) = self.staged.lock().as_ref() {
                return Ok(txn.lookup(&snapshot, id, key).cloned());
            }
        }
        Ok(snapshot.get(id, key).cloned())
    }

    /// Whether the record exists in the committed state, ignoring anything
    /// staged by the calling thread.
    pub(crate) fn is_committed(&self, id: CollectionId, key: &PrimaryKey) -> bool {
        self.snapshot().get(id, key).is_some()
    }

    /// All records of a collection as the calling thread sees them,
    /// ordered by key.
    fn records_of(&self, id: CollectionId) -> CoreResult<Vec<Record>> {
        self.ensure_open()?;
        let snapshot = self.snapshot();
        let mut records: BTreeMap<PrimaryKey, Record> = snapshot
            .collection(id)
            .into_iter()
            .flat_map(Collection::iter)
            .map(|r| (r.key().clone(), r.clone()))
            .collect();

        if self.transactions.is_writer() {
            if let Some(txn) = self.staged.lock().as_ref() {
                for (_, key, write) in txn.writes().filter(|(cid, _, _)| *cid == id) {
                    match write {
                        PendingWrite::Put(record) => {
                            records.insert(key.clone(), record.clone());
                        }
                        PendingWrite::Delete => {
                            records.remove(key);
                        }
                    }
                }
            }
        }
        Ok(records.into_values().collect())
    }

    /// Runs `f` against the transaction staged by the calling thread.
    ///
    /// `missing` is returned when the caller holds no open transaction,
    /// including while it delivers change notifications.
    fn with_staged<T>(
        &self,
        missing: StoreError,
        f: impl FnOnce(&mut Transaction, &Snapshot) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        if !self.transactions.is_writer() {
            return Err(missing.into());
        }
        let mut staged = self.staged.lock();
        let txn = staged.as_mut().ok_or(missing)?;
        let snapshot = self.snapshot();
        f(txn, &snapshot)
    }

    pub(crate) fn stage_create<I, K>(
        &self,
        type_name: &str,
        values: I,
        mode: UpdateMode,
    ) -> CoreResult<(CollectionId, PrimaryKey)>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let ty = self.registry.resolve(type_name)?;
        self.with_staged(StoreError::NoActiveTransaction, |txn, snapshot| {
            let input = RecordInput::validate(ty, values)?;
            let existing = txn.lookup(snapshot, ty.id(), &input.key).cloned();

            if existing.is_some() && mode == UpdateMode::Never {
                if txn.is_seeding() {
                    store_log!(
                        self.logger,
                        Debug,
                        Bootstrap,
                        "keeping existing {} {}",
                        ty.name(),
                        input.key
                    );
                    return Ok((ty.id(), input.key));
                }
                return Err(StoreError::KeyAlreadyExists {
                    type_name: ty.name().to_string(),
                    key: input.key,
                }
                .into());
            }

            let key = input.key.clone();
            let record = input.into_record(ty, existing.as_ref(), mode);
            txn.put(ty.id(), record);
            Ok((ty.id(), key))
        })
    }

    pub(crate) fn stage_update(
        &self,
        id: CollectionId,
        key: &PrimaryKey,
        property: &str,
        value: Value,
    ) -> CoreResult<()> {
        self.with_staged(StoreError::ReadOnlyOutsideTransaction, |txn, snapshot| {
            let ty = self
                .registry
                .by_id(id)
                .ok_or_else(|| StoreError::no_such_type(id.to_string()))?;
            if property == ty.primary_key() {
                return Err(StoreError::PrimaryKeyImmutable {
                    type_name: ty.name().to_string(),
                    property: property.to_string(),
                }
                .into());
            }
            ty.check_value(property, &value)?;

            let mut record = txn
                .lookup(snapshot, id, key)
                .cloned()
                .ok_or_else(|| StoreError::no_such_record(ty.name(), key.clone()))?;
            record.set(property, value);
            txn.put(id, record);
            Ok(())
        })
    }

    pub(crate) fn stage_delete(&self, id: CollectionId, key: &PrimaryKey) -> CoreResult<()> {
        self.with_staged(StoreError::ReadOnlyOutsideTransaction, |txn, snapshot| {
            if txn.lookup(snapshot, id, key).is_none() {
                let type_name = self.registry.by_id(id).map_or("", |t| t.name());
                return Err(StoreError::no_such_record(type_name, key.clone()).into());
            }
            txn.delete(id, key.clone());
            Ok(())
        })
    }

    /// Takes the write slot and opens a transaction on the calling thread.
    pub(crate) fn begin(&self, mode: Acquire) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        let id = match self.transactions.acquire(mode) {
            Ok(id) => id,
            Err(err) => {
                if err == StoreError::WriteConflict {
                    self.stats.record_write_conflict();
                }
                return Err(err.into());
            }
        };

        // Writers queued behind `close` wake up to a closed store.
        if self.closed.load(Ordering::Acquire) {
            self.transactions.release();
            return Err(StoreError::StoreClosed.into());
        }

        let base = self.snapshot().generation();
        *self.staged.lock() = Some(Transaction::new(id, base));
        self.stats.record_transaction_start();
        store_log!(self.logger, Trace, Transaction, "{} began at {}", id, base);
        Ok(id)
    }

    pub(crate) fn mark_seeding(&self) {
        if let Some(txn) = self.staged.lock().as_mut() {
            txn.mark_seeding();
        }
    }

    pub(crate) fn is_seeding(&self) -> bool {
        self.staged.lock().as_ref().is_some_and(Transaction::is_seeding)
    }

    /// Commits the calling thread's transaction and releases the slot.
    ///
    /// The WAL is written before the new snapshot becomes visible. If the
    /// write fails the log is cut back to its previous length and the
    /// transaction is dropped, leaving the committed state untouched.
    pub(crate) fn commit_staged(&self) -> CoreResult<Generation> {
        let _slot = SlotGuard(&self.transactions);
        let txn = self
            .staged
            .lock()
            .take()
            .ok_or(StoreError::NoActiveTransaction)?;
        let base = self.snapshot();

        if txn.is_empty() && !txn.is_seeding() {
            store_log!(self.logger, Trace, Transaction, "{} committed nothing", txn.id());
            self.stats.record_commit(0, 0, 0);
            return Ok(base.generation());
        }

        let generation = base.generation().next();
        let records = Self::wal_records(&txn, generation)?;
        let mark = self.wal.size()?;
        if let Err(err) = self.wal.append_batch(&records) {
            self.abandon_commit(&txn, mark, &err);
            return Err(err);
        }

        let next = txn.apply_to(&base, generation);
        let mut changes = Vec::new();
        let (mut created, mut updated, mut deleted) = (0, 0, 0);
        for (id, key, _) in txn.writes() {
            if let Some(change) = RecordChange::between(base.get(id, key), next.get(id, key)) {
                match change {
                    RecordChange::Created(_) => created += 1,
                    RecordChange::Modified { .. } => updated += 1,
                    RecordChange::Deleted => deleted += 1,
                }
                changes.push((id, key.clone(), change));
            }
        }

        *self.committed.write() = Arc::new(next);
        if txn.is_seeding() {
            self.manifest.lock().bootstrapped = true;
        }
        self.stats.record_commit(created, updated, deleted);
        store_log!(
            self.logger,
            Debug,
            Transaction,
            "{} committed at {} ({} writes, began at {})",
            txn.id(),
            generation,
            txn.write_count(),
            txn.base()
        );

        self.transactions.begin_delivery();
        let delivered = self.observers.dispatch(&changes);
        self.stats.record_notifications(delivered);
        if delivered > 0 {
            store_log!(
                self.logger,
                Trace,
                Notification,
                "{} notifications for {}",
                delivered,
                generation
            );
        }

        let events = changes
            .iter()
            .map(|(id, key, change)| {
                let type_name = self.registry.by_id(*id).map_or("", |t| t.name());
                ChangeEvent::from_change(generation, type_name, key, change)
            })
            .collect();
        self.changes.emit_batch(events);

        self.maybe_checkpoint();
        Ok(generation)
    }

    fn wal_records(txn: &Transaction, generation: Generation) -> CoreResult<Vec<WalRecord>> {
        let txid = txn.id();
        let mut records = Vec::with_capacity(txn.write_count() + 3);
        records.push(WalRecord::Begin { txid });
        for (collection_id, key, write) in txn.writes() {
            records.push(match write {
                PendingWrite::Put(record) => WalRecord::Put {
                    txid,
                    collection_id,
                    key: key.clone(),
                    properties: objdb_codec::to_cbor(record.properties())?,
                },
                PendingWrite::Delete => WalRecord::Delete {
                    txid,
                    collection_id,
                    key: key.clone(),
                },
            });
        }
        if txn.is_seeding() {
            records.push(WalRecord::Bootstrapped { txid });
        }
        records.push(WalRecord::Commit { txid, generation });
        Ok(records)
    }

    fn abandon_commit(&self, txn: &Transaction, mark: u64, err: &CoreError) {
        if let Err(truncate_err) = self.wal.truncate(mark) {
            store_log!(
                self.logger,
                Error,
                Storage,
                "could not cut WAL back to {} bytes: {}",
                mark,
                truncate_err
            );
        }
        self.stats.record_error();
        self.stats.record_rollback();
        store_log!(self.logger, Error, Transaction, "{} failed to commit: {}", txn.id(), err);
    }

    pub(crate) fn rollback_staged(&self) {
        let txn = self.staged.lock().take();
        self.transactions.release();
        if let Some(txn) = txn {
            self.stats.record_rollback();
            store_log!(
                self.logger,
                Debug,
                Transaction,
                "{} rolled back ({} writes discarded)",
                txn.id(),
                txn.write_count()
            );
        }
    }

    fn maybe_checkpoint(&self) {
        match self.wal.size() {
            Ok(size) if size > self.config.max_wal_size => {
                if let Err(err) = self.checkpoint_locked() {
                    self.stats.record_error();
                    store_log!(self.logger, Warn, Storage, "automatic checkpoint failed: {}", err);
                }
            }
            Ok(_) => {}
            Err(err) => {
                store_log!(self.logger, Warn, Storage, "could not read WAL size: {}", err);
            }
        }
    }

    /// Writes the committed state as an image and empties the WAL.
    /// The caller holds the write slot.
    fn checkpoint_locked(&self) -> CoreResult<()> {
        let snapshot = self.snapshot();
        let generation = snapshot.generation();
        let bytes = SnapshotImage::capture(&snapshot, &self.registry).encode()?;
        {
            let mut images = self.images.lock();
            images.replace(&bytes)?;
            images.sync()?;
        }
        self.wal.clear()?;
        self.wal.append(&WalRecord::Checkpoint { generation })?;
        self.wal.flush()?;

        {
            let mut manifest = self.manifest.lock();
            manifest.last_checkpoint = Some(generation);
            manifest.bootstrapped |= snapshot.bootstrapped();
            if let Some(dir) = self.dir.lock().as_ref() {
                dir.save_manifest(&manifest)?;
            }
        }

        self.stats.record_checkpoint();
        store_log!(
            self.logger,
            Info,
            Storage,
            "checkpoint at {} ({} bytes)",
            generation,
            bytes.len()
        );
        Ok(())
    }

    pub(crate) fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.transactions.acquire(Acquire::Block)?;
        let _slot = SlotGuard(&self.transactions);
        self.checkpoint_locked()
    }

    /// Waits for the active writer, closes every observer handle, persists
    /// the manifest and releases the directory lock.
    pub(crate) fn close(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.transactions.acquire(Acquire::Block)?;
        let _slot = SlotGuard(&self.transactions);
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.observers.close();
        self.wal.flush()?;
        self.images.lock().sync()?;

        let snapshot = self.snapshot();
        let dir = self.dir.lock().take();
        if let Some(dir) = dir {
            let mut manifest = self.manifest.lock();
            manifest.bootstrapped |= snapshot.bootstrapped();
            dir.save_manifest(&manifest)?;
        }

        store_log!(
            self.logger,
            Info,
            Storage,
            "closed {} at {}",
            self.label,
            snapshot.generation()
        );
        Ok(())
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            store_log!(self.logger, Error, Storage, "closing {} failed: {}", self.label, err);
        }
    }
}

/// An embedded object store.
///
/// `Store` is a cheap handle: clones share the same underlying store, which
/// is closed when the last clone is dropped or [`close`](Self::close) is
/// called.
///
/// # Reading and writing
///
/// Reads never wait for the writer. Mutations happen inside a write
/// transaction, of which at most one is open at a time:
///
/// ```rust,ignore
/// use objdb_core::{Store, SchemaDefinition, UpdateMode, Value};
/// use objdb_codec::PropertyType;
///
/// let schema = SchemaDefinition::new("FeatureFlags", "name")
///     .property("name", PropertyType::String)
///     .property("value", PropertyType::Bool);
/// let store = Store::open_in_memory([schema], |tx| {
///     tx.create(
///         "FeatureFlags",
///         [("name", Value::from("enableExperimentalFeature1")), ("value", Value::Bool(false))],
///         UpdateMode::Never,
///     )?;
///     Ok(())
/// })?;
///
/// let flag = store.find("FeatureFlags", "enableExperimentalFeature1")?.unwrap();
/// store.write(|tx| tx.update(&flag, "value", true))?;
/// ```
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Starts configuring a store with the given types.
    pub fn builder<I>(schemas: I) -> StoreBuilder
    where
        I: IntoIterator<Item = SchemaDefinition>,
    {
        StoreBuilder::new(schemas)
    }

    /// Opens or creates a store in the directory `path`.
    ///
    /// `seed` runs in a write transaction the first time the store is ever
    /// opened, and never again.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` if the store was created with other types,
    /// `StoreLocked` if another process has it open, and I/O or format
    /// errors from recovery.
    pub fn open<I, F>(schemas: I, path: impl AsRef<Path>, seed: F) -> CoreResult<Self>
    where
        I: IntoIterator<Item = SchemaDefinition>,
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<()> + Send + 'static,
    {
        StoreBuilder::new(schemas)
            .path(path.as_ref())
            .on_first_open(seed)
            .open()
    }

    /// Opens a fresh store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Schema validation errors and errors returned by `seed`.
    pub fn open_in_memory<I, F>(schemas: I, seed: F) -> CoreResult<Self>
    where
        I: IntoIterator<Item = SchemaDefinition>,
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<()> + Send + 'static,
    {
        StoreBuilder::new(schemas).on_first_open(seed).open()
    }

    /// Opens an existing store using the schema recorded in its manifest.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` if there is no store at `path`.
    pub fn open_existing(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_existing_with(path, Config::default())
    }

    /// Like [`open_existing`](Self::open_existing) with a custom
    /// configuration. The directory is never created.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` if there is no store at `path`.
    pub fn open_existing_with(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        StoreBuilder::from_manifest()
            .path(path.as_ref())
            .config(config.create_if_missing(false))
            .open()
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Looks up a record by primary key.
    ///
    /// A missing record is `Ok(None)`, as is a key of the wrong type.
    ///
    /// # Errors
    ///
    /// `NoSuchType` for an unregistered type, `StoreClosed` after close.
    pub fn find(&self, type_name: &str, key: impl Into<PrimaryKey>) -> CoreResult<Option<RecordRef>> {
        let ty = self.inner.registry.resolve(type_name)?;
        let key = key.into();
        if ty.check_key(&key).is_err() {
            self.inner.ensure_open()?;
            return Ok(None);
        }
        Ok(self
            .inner
            .lookup(ty.id(), &key)?
            .map(|_| RecordRef::new(&self.inner, ty.id(), ty.name(), key)))
    }

    /// Returns a copy of a record, or `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// `NoSuchType` for an unregistered type, `StoreClosed` after close.
    pub fn get(&self, type_name: &str, key: impl Into<PrimaryKey>) -> CoreResult<Option<Record>> {
        let ty = self.inner.registry.resolve(type_name)?;
        let key = key.into();
        if ty.check_key(&key).is_err() {
            self.inner.ensure_open()?;
            return Ok(None);
        }
        self.inner.lookup(ty.id(), &key)
    }

    /// All records of a type, ordered by primary key.
    ///
    /// # Errors
    ///
    /// `NoSuchType` for an unregistered type, `StoreClosed` after close.
    pub fn objects(&self, type_name: &str) -> CoreResult<Vec<Record>> {
        let ty = self.inner.registry.resolve(type_name)?;
        self.inner.records_of(ty.id())
    }

    /// Number of records of a type.
    ///
    /// # Errors
    ///
    /// `NoSuchType` for an unregistered type, `StoreClosed` after close.
    pub fn count(&self, type_name: &str) -> CoreResult<usize> {
        self.objects(type_name).map(|records| records.len())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Stages a new record, or an upsert depending on `mode`.
    ///
    /// Must be called on the thread holding the write transaction.
    ///
    /// # Errors
    ///
    /// - `NoActiveTransaction` outside a write transaction
    /// - `KeyAlreadyExists` for an existing key with [`UpdateMode::Never`]
    /// - `UnknownProperty`, `TypeMismatch` or `MissingPrimaryKey` for
    ///   invalid values
    pub fn create<I, K>(&self, type_name: &str, values: I, mode: UpdateMode) -> CoreResult<RecordRef>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let (id, key) = self.inner.stage_create(type_name, values, mode)?;
        let name = self.inner.registry.by_id(id).map_or(type_name, |t| t.name());
        Ok(RecordRef::new(&self.inner, id, name, key))
    }

    /// Stages a change to one property of `record`.
    ///
    /// # Errors
    ///
    /// - `ReadOnlyOutsideTransaction` outside a write transaction
    /// - `PrimaryKeyImmutable` for the key property
    /// - `UnknownProperty` or `TypeMismatch` for an invalid value
    /// - `NoSuchRecord` if the record no longer exists
    pub fn update(&self, record: &RecordRef, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        record.set(property, value)
    }

    /// Stages the removal of `record`.
    ///
    /// # Errors
    ///
    /// `ReadOnlyOutsideTransaction` outside a write transaction,
    /// `NoSuchRecord` if the record no longer exists.
    pub fn delete(&self, record: &RecordRef) -> CoreResult<()> {
        record.delete()
    }

    /// Opens the write transaction, following the configured
    /// [`WritePolicy`].
    ///
    /// # Errors
    ///
    /// - `NestedTransaction` if this thread already holds it
    /// - `ReentrantWrite` from inside a change callback
    /// - `WriteConflict` under [`WritePolicy::Fail`] when another writer
    ///   is active
    pub fn begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        let mode = match self.inner.config.write_policy {
            WritePolicy::Block => Acquire::Block,
            WritePolicy::Fail => Acquire::Fail,
        };
        self.begin_with(mode)
    }

    /// Opens the write transaction only if no other writer is active.
    ///
    /// # Errors
    ///
    /// `WriteConflict` if another writer holds the store, plus the errors
    /// of [`begin_write`](Self::begin_write).
    pub fn try_begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        self.begin_with(Acquire::Fail)
    }

    /// Opens the write transaction, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// `WriteConflict` if the wait times out, plus the errors of
    /// [`begin_write`](Self::begin_write).
    pub fn begin_write_timeout(&self, timeout: Duration) -> CoreResult<WriteTransaction<'_>> {
        self.begin_with(Acquire::Timeout(timeout))
    }

    pub(crate) fn begin_with(&self, mode: Acquire) -> CoreResult<WriteTransaction<'_>> {
        let id = self.inner.begin(mode)?;
        Ok(WriteTransaction::new(self, id))
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok` and
    /// rolling back otherwise.
    ///
    /// # Errors
    ///
    /// The error returned by `f`, or any error from
    /// [`begin_write`](Self::begin_write) or commit.
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        let mut tx = self.begin_write()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Whether the calling thread holds the write transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.transactions.is_writer()
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Returns a handle that watches one record.
    ///
    /// The record need not exist.
    ///
    /// # Errors
    ///
    /// `NoSuchType` for an unregistered type, `TypeMismatch` if `key` has
    /// the wrong type, `StoreClosed` after close.
    pub fn observe(&self, type_name: &str, key: impl Into<PrimaryKey>) -> CoreResult<ObserverHandle> {
        self.inner.ensure_open()?;
        let ty = self.inner.registry.resolve(type_name)?;
        let key = key.into();
        ty.check_key(&key)?;
        Ok(ObserverHandle::register(&self.inner, ty.id(), ty.name(), key))
    }

    /// Returns a receiver for every future committed change.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    /// Returns up to `limit` remembered changes newer than `after`.
    #[must_use]
    pub fn poll_changes(&self, after: Generation, limit: usize) -> Vec<ChangeEvent> {
        self.inner.changes.poll(after, limit)
    }

    /// Number of live observer handles.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.live_handles()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Writes a checkpoint image and empties the WAL.
    ///
    /// Waits for the active writer.
    ///
    /// # Errors
    ///
    /// I/O errors, `StoreClosed`, or `NestedTransaction` if called while this
    /// thread holds the write transaction.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.inner.checkpoint()
    }

    /// Closes the store.
    ///
    /// Waits for the active writer, closes all observer handles, saves the
    /// manifest and releases the directory lock. Later operations fail
    /// with `StoreClosed`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// I/O errors while flushing, or `NestedTransaction` if called while
    /// this thread holds the write transaction.
    pub fn close(&self) -> CoreResult<()> {
        self.inner.close()
    }

    /// Whether [`close`](Self::close) has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Generation of the latest committed transaction.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.inner.snapshot().generation()
    }

    /// Whether the first-open seed has committed.
    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.inner.is_bootstrapped()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// The registered types.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The store directory, or `None` for in-memory stores and stores that
    /// have been closed.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.dir.lock().as_ref().map(|d| d.path().to_path_buf())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.inner.label)
            .field("generation", &self.generation())
            .field("closed", &self.is_closed())
            .field("types", &self.inner.registry.len())
            .field("waiting_writers", &self.inner.transactions.waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_feed::ChangeType;
    use crate::observer::HandleState;
    use objdb_codec::PropertyType;
    use objdb_storage::{FaultyBackend, InMemoryBackend};
    use std::sync::mpsc;
    use std::thread;

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Bool)
            .property("rollout", PropertyType::Double)
    }

    fn store() -> Store {
        Store::builder([flags()]).open().unwrap()
    }

    fn flag(name: &str, value: bool) -> [(&'static str, Value); 2] {
        [("name", Value::from(name)), ("value", Value::Bool(value))]
    }

    fn create(store: &Store, name: &str, value: bool) {
        store
            .write(|tx| tx.create("FeatureFlags", flag(name, value), UpdateMode::Never).map(|_| ()))
            .unwrap();
    }

    #[test]
    fn create_fills_defaults_and_rejects_duplicates() {
        let store = store();
        create(&store, "a", true);

        let record = store.get("FeatureFlags", "a").unwrap().unwrap();
        assert_eq!(record.get("rollout"), Some(&Value::Double(0.0)));

        let err = store
            .write(|tx| tx.create("FeatureFlags", flag("a", false), UpdateMode::Never).map(|_| ()))
            .unwrap_err();
        assert!(matches!(
            err.as_store_error(),
            Some(StoreError::KeyAlreadyExists { .. })
        ));
    }

    #[test]
    fn update_modes() {
        let store = store();
        store
            .write(|tx| {
                tx.create(
                    "FeatureFlags",
                    [
                        ("name", Value::from("a")),
                        ("value", Value::Bool(true)),
                        ("rollout", Value::Double(0.5)),
                    ],
                    UpdateMode::Never,
                )?;
                Ok(())
            })
            .unwrap();

        store
            .write(|tx| {
                tx.create("FeatureFlags", [("name", Value::from("a")), ("value", Value::Bool(false))], UpdateMode::Modified)?;
                Ok(())
            })
            .unwrap();
        let record = store.get("FeatureFlags", "a").unwrap().unwrap();
        assert_eq!(record.get("rollout"), Some(&Value::Double(0.5)));
        assert_eq!(record.get("value"), Some(&Value::Bool(false)));

        store
            .write(|tx| {
                tx.create("FeatureFlags", [("name", Value::from("a")), ("value", Value::Bool(true))], UpdateMode::All)?;
                Ok(())
            })
            .unwrap();
        let record = store.get("FeatureFlags", "a").unwrap().unwrap();
        assert_eq!(record.get("rollout"), Some(&Value::Double(0.0)));
    }

    #[test]
    fn mutations_need_a_transaction() {
        let store = store();
        create(&store, "a", false);
        let flag_ref = store.find("FeatureFlags", "a").unwrap().unwrap();

        let err = store.create("FeatureFlags", flag("b", true), UpdateMode::Never).unwrap_err();
        assert_eq!(err.as_store_error(), Some(&StoreError::NoActiveTransaction));

        let err = store.update(&flag_ref, "value", true).unwrap_err();
        assert_eq!(err.as_store_error(), Some(&StoreError::ReadOnlyOutsideTransaction));
    }

    #[test]
    fn update_validation() {
        let store = store();
        create(&store, "a", false);
        let flag_ref = store.find("FeatureFlags", "a").unwrap().unwrap();

        let mut tx = store.begin_write().unwrap();
        let err = tx.update(&flag_ref, "name", "b").unwrap_err();
        assert!(matches!(err.as_store_error(), Some(StoreError::PrimaryKeyImmutable { .. })));
        let err = tx.update(&flag_ref, "value", 3i64).unwrap_err();
        assert!(matches!(err.as_store_error(), Some(StoreError::TypeMismatch { .. })));
        let err = tx.update(&flag_ref, "colour", "red").unwrap_err();
        assert!(matches!(err.as_store_error(), Some(StoreError::UnknownProperty { .. })));

        tx.delete(&flag_ref).unwrap();
        let err = tx.update(&flag_ref, "value", true).unwrap_err();
        assert!(matches!(err.as_store_error(), Some(StoreError::NoSuchRecord { .. })));
        tx.rollback();

        assert!(flag_ref.is_valid());
    }

    #[test]
    fn absent_keys_are_not_errors() {
        let store = store();
        assert!(store.find("FeatureFlags", "nonexistent").unwrap().is_none());
        assert!(store.find("FeatureFlags", 42i64).unwrap().is_none());
        assert!(matches!(
            store.find("Missing", "x").unwrap_err().as_store_error(),
            Some(StoreError::NoSuchType { .. })
        ));
    }

    #[test]
    fn writer_reads_its_own_writes() {
        let store = store();
        let (tx_ready, rx_ready) = mpsc::channel();
        let (tx_done, rx_done) = mpsc::channel::<()>();

        let mut tx = store.begin_write().unwrap();
        tx.create("FeatureFlags", flag("a", true), UpdateMode::Never).unwrap();
        assert!(tx.find("FeatureFlags", "a").unwrap().is_some());
        assert_eq!(tx.objects("FeatureFlags").unwrap().len(), 1);

        let reader = store.clone();
        let handle = thread::spawn(move || {
            tx_ready.send(reader.find("FeatureFlags", "a").unwrap().is_some()).unwrap();
            rx_done.recv().unwrap();
            reader.find("FeatureFlags", "a").unwrap().is_some()
        });

        assert!(!rx_ready.recv().unwrap());
        tx.commit().unwrap();
        tx_done.send(()).unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn nested_and_conflicting_writers() {
        let store = store();
        let tx = store.begin_write().unwrap();
        assert!(store.in_transaction());
        let err = store.begin_write().unwrap_err();
        assert_eq!(err.as_store_error(), Some(&StoreError::NestedTransaction));

        let other = store.clone();
        let results = thread::spawn(move || {
            let try_err = other.try_begin_write().map(|_| ()).unwrap_err();
            let timeout_err = other
                .begin_write_timeout(Duration::from_millis(20))
                .map(|_| ())
                .unwrap_err();
            (try_err, timeout_err)
        })
        .join()
        .unwrap();
        assert_eq!(results.0.as_store_error(), Some(&StoreError::WriteConflict));
        assert_eq!(results.1.as_store_error(), Some(&StoreError::WriteConflict));
        assert_eq!(store.stats().write_conflicts, 2);

        tx.rollback();
        assert!(!store.in_transaction());
        assert!(store.try_begin_write().is_ok());
    }

    #[test]
    fn fail_policy_applies_to_begin_write() {
        let store = Store::builder([flags()])
            .config(Config::default().write_policy(WritePolicy::Fail))
            .open()
            .unwrap();
        let _tx = store.begin_write().unwrap();
        let other = store.clone();
        let err = thread::spawn(move || other.begin_write().map(|_| ()).unwrap_err())
            .join()
            .unwrap();
        assert_eq!(err.as_store_error(), Some(&StoreError::WriteConflict));
    }

    #[test]
    fn rollback_discards_and_does_not_notify() {
        let store = store();
        let handle = store.observe("FeatureFlags", "a").unwrap();
        let changes = handle.changes();
        let generation = store.generation();

        {
            let mut tx = store.begin_write().unwrap();
            tx.create("FeatureFlags", flag("a", true), UpdateMode::Never).unwrap();
            // Dropped without commit.
        }

        assert!(store.find("FeatureFlags", "a").unwrap().is_none());
        assert_eq!(store.generation(), generation);
        assert!(changes.try_recv().is_err());
        assert_eq!(store.stats().transactions_rolled_back, 1);
    }

    #[test]
    fn write_closure_error_rolls_back() {
        let store = store();
        let err = store
            .write(|tx| {
                tx.create("FeatureFlags", flag("a", true), UpdateMode::Never)?;
                tx.create("FeatureFlags", flag("a", true), UpdateMode::Never)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err.as_store_error(), Some(StoreError::KeyAlreadyExists { .. })));
        assert_eq!(store.count("FeatureFlags").unwrap(), 0);
        assert!(!store.in_transaction());
    }

    #[test]
    fn observer_lifecycle() {
        let store = store();
        let handle = store.observe("FeatureFlags", "a").unwrap();
        assert_eq!(handle.state(), HandleState::Unbound);
        assert!(handle.current().is_none());
        assert_eq!(handle.state(), HandleState::Deleted);

        create(&store, "a", false);
        assert_eq!(handle.state(), HandleState::Bound);

        let flag_ref = store.find("FeatureFlags", "a").unwrap().unwrap();
        store.write(|tx| tx.delete(&flag_ref)).unwrap();
        assert_eq!(handle.state(), HandleState::Deleted);

        store.close().unwrap();
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(handle.current().is_none());
    }

    #[test]
    fn staged_writes_do_not_move_handle_state() {
        let store = store();
        create(&store, "a", false);
        let existing = store.observe("FeatureFlags", "a").unwrap();
        let missing = store.observe("FeatureFlags", "b").unwrap();
        assert!(existing.current().is_some());
        assert!(missing.current().is_none());

        let mut tx = store.begin_write().unwrap();
        let a = tx.find("FeatureFlags", "a").unwrap().unwrap();
        tx.delete(&a).unwrap();
        tx.create("FeatureFlags", flag("b", true), UpdateMode::Never).unwrap();

        assert!(existing.current().is_none());
        assert!(missing.current().is_some());
        assert_eq!(existing.state(), HandleState::Bound);
        assert_eq!(missing.state(), HandleState::Deleted);

        tx.rollback();
        assert_eq!(existing.state(), HandleState::Bound);
        assert_eq!(missing.state(), HandleState::Deleted);
        assert!(existing.current().is_some());
        assert!(missing.current().is_none());
    }

    #[test]
    fn one_notification_per_commit() {
        let store = store();
        create(&store, "a", false);
        create(&store, "b", false);
        let handle = store.observe("FeatureFlags", "a").unwrap();
        let changes = handle.changes();

        store
            .write(|tx| {
                let a = tx.find("FeatureFlags", "a")?.unwrap();
                tx.update(&a, "value", true)?;
                tx.update(&a, "rollout", 1.0)?;
                Ok(())
            })
            .unwrap();
        create(&store, "c", true);

        let received: Vec<_> = changes.try_iter().collect();
        assert_eq!(received.len(), 1);
        match &received[0] {
            RecordChange::Modified {
                record,
                changed_properties,
            } => {
                assert_eq!(record.get("value"), Some(&Value::Bool(true)));
                assert_eq!(changed_properties, &vec!["rollout".to_string(), "value".to_string()]);
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn handle_set_requires_record_and_transaction() {
        let store = store();
        let handle = store.observe("FeatureFlags", "missing").unwrap();
        let err = handle.set("value", true).unwrap_err();
        assert_eq!(err.as_store_error(), Some(&StoreError::ReadOnlyOutsideTransaction));

        let mut tx = store.begin_write().unwrap();
        let err = handle.set("value", true).unwrap_err();
        assert!(matches!(err.as_store_error(), Some(StoreError::NoSuchRecord { .. })));
        tx.create("FeatureFlags", flag("missing", false), UpdateMode::Never).unwrap();
        handle.set("value", true).unwrap();
        tx.commit().unwrap();

        assert_eq!(handle.current().unwrap().get("value"), Some(&Value::Bool(true)));
    }

    #[test]
    fn callbacks_cannot_write() {
        let store = store();
        let handle = store.observe("FeatureFlags", "a").unwrap();
        let (tx, rx) = mpsc::channel();
        let inner = store.clone();
        handle.on_change(move |_| {
            let result = inner.begin_write().map(|_| ());
            tx.send(result.unwrap_err().as_store_error().cloned()).unwrap();
        });

        create(&store, "a", true);
        assert_eq!(rx.recv().unwrap(), Some(StoreError::ReentrantWrite));
        assert!(!store.in_transaction());
    }

    #[test]
    fn dropped_handles_are_released() {
        let store = store();
        let handle = store.observe("FeatureFlags", "a").unwrap();
        let id = handle.on_change(|_| {});
        assert_eq!(store.observer_count(), 1);
        assert!(handle.unsubscribe(id));
        assert!(!handle.unsubscribe(id));
        drop(handle);
        assert_eq!(store.observer_count(), 0);
        create(&store, "a", true);
        assert_eq!(store.stats().notifications, 0);
    }

    #[test]
    fn change_feed_follows_commits() {
        let store = store();
        let feed = store.subscribe();
        create(&store, "a", false);
        let a = store.find("FeatureFlags", "a").unwrap().unwrap();
        store.write(|tx| tx.update(&a, "value", true)).unwrap();
        store.write(|tx| tx.delete(&a)).unwrap();

        let kinds: Vec<_> = feed.try_iter().map(|e| e.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Insert, ChangeType::Update, ChangeType::Delete]);
        let after_insert = store.poll_changes(Generation::new(2), 10);
        assert_eq!(after_insert.len(), 2);
    }

    #[test]
    fn failed_commit_leaves_state_untouched() {
        let wal_mem = InMemoryBackend::new();
        let (wal, faults) = FaultyBackend::wrap(Box::new(wal_mem.share()));
        let store = Store::builder([flags()])
            .backends(Box::new(wal), Box::new(InMemoryBackend::new()))
            .open()
            .unwrap();
        let generation = store.generation();
        let wal_len = wal_mem.data().len();

        faults.fail_appends_after(0);
        let err = store
            .write(|tx| {
                tx.create("FeatureFlags", flag("a", true), UpdateMode::Never)?;
                tx.create("FeatureFlags", flag("b", true), UpdateMode::Never)?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_io_failure());
        assert_eq!(store.generation(), generation);
        assert_eq!(store.count("FeatureFlags").unwrap(), 0);
        assert_eq!(wal_mem.data().len(), wal_len);

        faults.heal();
        create(&store, "a", true);
        assert_eq!(store.count("FeatureFlags").unwrap(), 1);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = store();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert_eq!(
            store.find("FeatureFlags", "a").unwrap_err().as_store_error(),
            Some(&StoreError::StoreClosed)
        );
        assert_eq!(
            store.get("FeatureFlags", 7_i64).unwrap_err().as_store_error(),
            Some(&StoreError::StoreClosed)
        );
        assert_eq!(
            store.find("FeatureFlags", 7_i64).unwrap_err().as_store_error(),
            Some(&StoreError::StoreClosed)
        );
        assert!(store.begin_write().is_err());
        assert!(store.observe("FeatureFlags", "a").is_err());
    }

    #[test]
    fn sync_on_commit_controls_wal_sync() {
        for (sync_on_commit, per_commit) in [(true, 1), (false, 0)] {
            let (wal, faults) = FaultyBackend::wrap(Box::new(InMemoryBackend::new()));
            let store = Store::builder([flags()])
                .backends(Box::new(wal), Box::new(InMemoryBackend::new()))
                .config(Config::default().sync_on_commit(sync_on_commit))
                .open()
                .unwrap();
            let before = faults.sync_count();

            create(&store, "a", true);
            create(&store, "b", false);
            assert_eq!(faults.sync_count(), before + 2 * per_commit);

            store.close().unwrap();
            assert_eq!(faults.sync_count(), before + 2 * per_commit + 1);
        }
    }

    #[test]
    fn auto_checkpoint_trims_wal() {
        let wal_mem = InMemoryBackend::new();
        let images = InMemoryBackend::new();
        let store = Store::builder([flags()])
            .backends(Box::new(wal_mem.share()), Box::new(images.share()))
            .config(Config::default().max_wal_size(256))
            .open()
            .unwrap();
        for i in 0..8 {
            create(&store, &format!("flag{i}"), true);
        }
        assert!(store.stats().checkpoints > 0);
        assert!(!images.data().is_empty());
        assert!((wal_mem.data().len() as u64) < 1024);
    }
}
