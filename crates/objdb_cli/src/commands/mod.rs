//! CLI command implementations.

pub mod checkpoint;
pub mod dump_wal;
pub mod flags;
pub mod inspect;
pub mod verify;
