//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! Every commit is appended to the WAL, and flushed when the store syncs on
//! commit, before its effects become visible. On open the WAL is replayed
//! on top of the last checkpoint image to rebuild the committed state.
//!
//! ## WAL Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A transaction is written as one batch:
//!
//! ```text
//! Begin, (Put | Delete)*, [Bootstrapped], Commit
//! ```
//!
//! ## Recovery Policy
//!
//! - An incomplete record at the end of the log is a torn write: recovery
//!   stops there and the tail is truncated. A transaction without its
//!   `Commit` record is discarded.
//! - A CRC mismatch, bad magic or an unknown record type anywhere before the
//!   tail aborts the open with an error.

mod iterator;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{compute_crc32, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::{WalManager, WalScan};
