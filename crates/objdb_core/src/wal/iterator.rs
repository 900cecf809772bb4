//! WAL record iterator.
//!
//! Recovery reads the whole log into memory once and walks it with
//! [`WalRecordIterator`]. The iterator distinguishes a torn tail, which ends
//! iteration cleanly, from corruption, which is an error.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{
    compute_crc32, WalRecord, WalRecordType, CRC_SIZE, HEADER_FIELDS_SIZE, HEADER_SIZE, WAL_MAGIC,
    WAL_VERSION,
};

/// Iterates over the framed records of a WAL image.
///
/// Yields `(offset, record)` pairs. After iteration stops without an error,
/// [`valid_len`](Self::valid_len) is the length of the log prefix made of
/// complete records.
///
/// # Error Handling
///
/// - an incomplete header, or an incomplete payload behind a valid header,
///   at the end is treated as WAL end
/// - a header checksum mismatch is corruption, so a damaged length field is
///   never mistaken for a torn tail
/// - invalid magic, unknown versions and unknown record types are corruption
/// - a CRC mismatch is an error, never silently skipped
#[derive(Debug)]
pub struct WalRecordIterator<'a> {
    data: &'a [u8],
    offset: usize,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates an iterator over `data`, which must start at a record boundary.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            finished: false,
        }
    }

    /// Length of the prefix consumed so far as complete records.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    /// Whether bytes remain beyond the last complete record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.finished && self.offset < self.data.len()
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        let remaining = &self.data[start..];

        if remaining.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = &remaining[..HEADER_SIZE];

        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let stored_header = u32::from_le_bytes([
            header[HEADER_FIELDS_SIZE],
            header[HEADER_FIELDS_SIZE + 1],
            header[HEADER_FIELDS_SIZE + 2],
            header[HEADER_FIELDS_SIZE + 3],
        ]);
        if stored_header != compute_crc32(&header[..HEADER_FIELDS_SIZE]) {
            return Err(CoreError::wal_corruption(format!(
                "header checksum mismatch at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::wal_corruption(format!("unknown record type {type_byte} at offset {start}"))
        })?;

        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < total {
            return Ok(None);
        }

        let body = &remaining[..HEADER_SIZE + len];
        let stored = u32::from_le_bytes([
            remaining[HEADER_SIZE + len],
            remaining[HEADER_SIZE + len + 1],
            remaining[HEADER_SIZE + len + 2],
            remaining[HEADER_SIZE + len + 3],
        ]);
        let actual = compute_crc32(body);
        if stored != actual {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let record = WalRecord::decode_payload(record_type, &body[HEADER_SIZE..])?;
        self.offset += total;
        Ok(Some((start as u64, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
