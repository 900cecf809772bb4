//! # ObjDB Storage
//!
//! Byte-store backends used by ObjDB for its write-ahead log and its
//! checkpoint image.
//!
//! Backends never interpret what they hold. The core crate owns every
//! format: WAL framing, snapshot layout, manifest encoding.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - persistent storage on the local file system
//! - [`FaultyBackend`] - wraps another backend and fails on demand, for
//!   exercising commit failure paths
//!
//! ## Example
//!
//! ```rust
//! use objdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod faulty;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use faulty::{FaultHandle, FaultyBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
