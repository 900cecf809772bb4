//! WAL writer and reader.

use crate::error::{CoreError, CoreResult};
use crate::wal::iterator::WalRecordIterator;
use crate::wal::record::{
    compute_crc32, WalRecord, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION,
};
use objdb_storage::StorageBackend;
use parking_lot::Mutex;

/// The records found in a WAL and where its valid prefix ends.
#[derive(Debug, Default)]
pub struct WalScan {
    /// Complete records with their offsets.
    pub records: Vec<(u64, WalRecord)>,
    /// Length of the prefix made of complete records.
    pub valid_len: u64,
    /// Whether an incomplete record follows the valid prefix.
    pub torn_tail: bool,
}

/// Manages WAL writes and reads.
///
/// A commit appends all of its records as one framed batch, so a crash
/// leaves either nothing of the transaction, a prefix without its `Commit`
/// record, or the complete transaction.
pub struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    /// Whether to sync after each batch.
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a new WAL manager.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Frames one record: header with its own CRC32, payload, and a CRC32
    /// over both.
    fn frame(record: &WalRecord, out: &mut Vec<u8>) -> CoreResult<()> {
        let payload = record.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_format("WAL record payload too large"))?;

        let start = out.len();
        out.reserve(HEADER_SIZE + payload.len() + CRC_SIZE);
        out.extend_from_slice(&WAL_MAGIC);
        out.extend_from_slice(&WAL_VERSION.to_le_bytes());
        out.push(record.record_type().as_byte());
        out.extend_from_slice(&len.to_le_bytes());
        let header_crc = compute_crc32(&out[start..]);
        out.extend_from_slice(&header_crc.to_le_bytes());
        out.extend_from_slice(&payload);

        let crc = compute_crc32(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Appends a record to the WAL.
    ///
    /// Returns the offset where the record was written.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Appends several records with a single backend write.
    ///
    /// Returns the offset of the first record.
    pub fn append_batch(&self, records: &[WalRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            Self::frame(record, &mut data)?;
        }

        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Flushes all pending writes to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Returns the current WAL size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Reads and validates every record in the WAL.
    ///
    /// # Errors
    ///
    /// Fails on a CRC mismatch or any other corruption before the tail.
    pub fn scan(&self) -> CoreResult<WalScan> {
        let data = self.backend.lock().read_all()?;
        let mut iter = WalRecordIterator::new(&data);
        let records = iter.by_ref().collect::<CoreResult<Vec<_>>>()?;
        Ok(WalScan {
            records,
            valid_len: iter.valid_len(),
            torn_tail: iter.has_torn_tail(),
        })
    }

    /// Discards everything after `offset`.
    ///
    /// Used to drop a torn tail after recovery and to undo a commit whose
    /// append failed part-way.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    /// Clears all data from the WAL after a checkpoint.
    pub fn clear(&self) -> CoreResult<()> {
        self.truncate(0)
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
