//! # ObjDB Testkit
//!
//! Test utilities for ObjDB.
//!
//! This crate provides:
//! - Store fixtures seeded with feature flags, in memory or in a temp dir
//! - In-memory "disks" for crash and restart simulation
//! - Property-based test generators using proptest
//! - Contended-writer stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         let flags = FlagBinding::new(store).unwrap();
//!         assert_eq!(flags.read_flag(EXPERIMENTAL_FLAG), Some(false));
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use objdb_core::{FlagBinding, Store};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
