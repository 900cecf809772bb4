//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, Generation, TransactionId};
use objdb_codec::PrimaryKey;

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"OWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Header fields covered by the header checksum: magic (4) + version (2) +
/// type (1) + length (4).
pub(crate) const HEADER_FIELDS_SIZE: usize = 11;

/// Header size: the header fields followed by their CRC32 (4).
pub(crate) const HEADER_SIZE: usize = HEADER_FIELDS_SIZE + 4;

/// Trailing checksum size.
pub(crate) const CRC_SIZE: usize = 4;

const KEY_TAG_STRING: u8 = 0;
const KEY_TAG_INT: u8 = 1;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Begin a transaction.
    Begin = 1,
    /// Insert or replace a record.
    Put = 2,
    /// Delete a record.
    Delete = 3,
    /// Commit a transaction.
    Commit = 4,
    /// Mark the store as bootstrapped.
    Bootstrapped = 5,
    /// Checkpoint marker.
    Checkpoint = 6,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            5 => Some(Self::Bootstrapped),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A WAL record describing one step of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Begin a transaction.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// Insert or replace a record.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Collection of the record's type.
        collection_id: CollectionId,
        /// Primary key.
        key: PrimaryKey,
        /// CBOR-encoded property map.
        properties: Vec<u8>,
    },

    /// Delete a record.
    Delete {
        /// Transaction ID.
        txid: TransactionId,
        /// Collection of the record's type.
        collection_id: CollectionId,
        /// Primary key.
        key: PrimaryKey,
    },

    /// The transaction is the store's bootstrap transaction.
    Bootstrapped {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// Commit a transaction.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Generation produced by this commit.
        generation: Generation,
    },

    /// Everything up to `generation` is in the checkpoint image.
    Checkpoint {
        /// Generation captured by the image.
        generation: Generation,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Bootstrapped { .. } => WalRecordType::Bootstrapped,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this record belongs to one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Bootstrapped { txid }
            | Self::Commit { txid, .. } => Some(*txid),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Fails if a key or property map is longer than a 4-byte length field
    /// can describe.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Begin { txid } | Self::Bootstrapped { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }

            Self::Put {
                txid,
                collection_id,
                key,
                properties,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&collection_id.as_u32().to_le_bytes());
                encode_key(&mut buf, key)?;
                put_len_prefixed(&mut buf, properties)?;
            }

            Self::Delete {
                txid,
                collection_id,
                key,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&collection_id.as_u32().to_le_bytes());
                encode_key(&mut buf, key)?;
            }

            Self::Commit { txid, generation } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&generation.as_u64().to_le_bytes());
            }

            Self::Checkpoint { generation } => {
                buf.extend_from_slice(&generation.as_u64().to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);

        let record = match record_type {
            WalRecordType::Begin => Self::Begin {
                txid: TransactionId::new(reader.u64()?),
            },
            WalRecordType::Put => Self::Put {
                txid: TransactionId::new(reader.u64()?),
                collection_id: CollectionId::new(reader.u32()?),
                key: reader.key()?,
                properties: reader.len_prefixed()?.to_vec(),
            },
            WalRecordType::Delete => Self::Delete {
                txid: TransactionId::new(reader.u64()?),
                collection_id: CollectionId::new(reader.u32()?),
                key: reader.key()?,
            },
            WalRecordType::Commit => Self::Commit {
                txid: TransactionId::new(reader.u64()?),
                generation: Generation::new(reader.u64()?),
            },
            WalRecordType::Bootstrapped => Self::Bootstrapped {
                txid: TransactionId::new(reader.u64()?),
            },
            WalRecordType::Checkpoint => Self::Checkpoint {
                generation: Generation::new(reader.u64()?),
            },
        };

        reader.finish(record_type)?;
        Ok(record)
    }
}

fn encode_key(buf: &mut Vec<u8>, key: &PrimaryKey) -> CoreResult<()> {
    match key {
        PrimaryKey::String(s) => {
            buf.push(KEY_TAG_STRING);
            put_len_prefixed(buf, s.as_bytes())
        }
        PrimaryKey::Int(n) => {
            buf.push(KEY_TAG_INT);
            buf.extend_from_slice(&n.to_le_bytes());
            Ok(())
        }
    }
}

fn put_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::invalid_format("WAL field larger than 4 GiB"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked little-endian reader over a record payload.
struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
        let bytes = &self.payload[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        self.take(N)?
            .try_into()
            .map_err(|_| CoreError::wal_corruption("short field"))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn u32(&mut self) -> CoreResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn len_prefixed(&mut self) -> CoreResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn key(&mut self) -> CoreResult<PrimaryKey> {
        let [tag] = self.array::<1>()?;
        match tag {
            KEY_TAG_STRING => {
                let bytes = self.len_prefixed()?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| CoreError::wal_corruption("key is not UTF-8"))?;
                Ok(PrimaryKey::String(s.to_string()))
            }
            KEY_TAG_INT => Ok(PrimaryKey::Int(i64::from_le_bytes(self.array()?))),
            other => Err(CoreError::wal_corruption(format!("unknown key tag {other}"))),
        }
    }

    fn finish(&self, record_type: WalRecordType) -> CoreResult<()> {
        if self.pos == self.payload.len() {
            Ok(())
        } else {
            Err(CoreError::wal_corruption(format!(
                "trailing bytes in {record_type:?} record: expected {} bytes, got {}",
                self.pos,
                self.payload.len()
            )))
        }
    }
}

/// Computes the CRC32 checksum of a framed record.
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
