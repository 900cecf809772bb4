//! Write transactions.
//!
//! A store has one writer at a time and any number of readers:
//! - **Atomicity**: staged writes become visible all at once on commit
//! - **Isolation**: readers see the last committed snapshot, the writer
//!   sees its own staged writes
//! - **Durability**: a commit is in the WAL before it is visible
//!
//! Writers that find the store busy queue up and are served in arrival
//! order.

mod manager;
mod state;
mod write;

pub(crate) use manager::{Acquire, SlotGuard, TransactionManager};
pub(crate) use state::{PendingWrite, Transaction};
pub use write::WriteTransaction;
