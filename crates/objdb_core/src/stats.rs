//! Store counters.
//!
//! ```rust,ignore
//! let stats = store.stats();
//! println!("commits: {}", stats.transactions_committed);
//! println!("conflicts: {}", stats.write_conflicts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated without locking.
#[derive(Debug, Default)]
pub(crate) struct StoreStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    records_created: AtomicU64,
    records_updated: AtomicU64,
    records_deleted: AtomicU64,
    notifications: AtomicU64,
    checkpoints: AtomicU64,
    write_conflicts: AtomicU64,
    errors: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl StoreStats {
    pub(crate) fn record_transaction_start(&self) {
        bump(&self.transactions_started, 1);
    }

    pub(crate) fn record_commit(&self, created: u64, updated: u64, deleted: u64) {
        bump(&self.transactions_committed, 1);
        bump(&self.records_created, created);
        bump(&self.records_updated, updated);
        bump(&self.records_deleted, deleted);
    }

    pub(crate) fn record_rollback(&self) {
        bump(&self.transactions_rolled_back, 1);
    }

    pub(crate) fn record_notifications(&self, count: usize) {
        bump(&self.notifications, count as u64);
    }

    pub(crate) fn record_checkpoint(&self) {
        bump(&self.checkpoints, 1);
    }

    pub(crate) fn record_write_conflict(&self) {
        bump(&self.write_conflicts, 1);
    }

    pub(crate) fn record_error(&self) {
        bump(&self.errors, 1);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            transactions_started: load(&self.transactions_started),
            transactions_committed: load(&self.transactions_committed),
            transactions_rolled_back: load(&self.transactions_rolled_back),
            records_created: load(&self.records_created),
            records_updated: load(&self.records_updated),
            records_deleted: load(&self.records_deleted),
            notifications: load(&self.notifications),
            checkpoints: load(&self.checkpoints),
            write_conflicts: load(&self.write_conflicts),
            errors: load(&self.errors),
        }
    }
}

/// Point-in-time copy of the store counters.
///
/// Counters start at zero each time the store is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Write transactions begun.
    pub transactions_started: u64,
    /// Write transactions committed.
    pub transactions_committed: u64,
    /// Write transactions rolled back, explicitly or by a failed commit.
    pub transactions_rolled_back: u64,
    /// Records inserted by committed transactions.
    pub records_created: u64,
    /// Records changed by committed transactions.
    pub records_updated: u64,
    /// Records removed by committed transactions.
    pub records_deleted: u64,
    /// Observer notifications delivered.
    pub notifications: u64,
    /// Checkpoints written.
    pub checkpoints: u64,
    /// Write attempts rejected because another writer held the slot.
    pub write_conflicts: u64,
    /// Commit and checkpoint failures.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_zero() {
        assert_eq!(StoreStats::default().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn commit_counts_records() {
        let stats = StoreStats::default();
        stats.record_transaction_start();
        stats.record_commit(2, 1, 0);
        stats.record_transaction_start();
        stats.record_rollback();

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_rolled_back, 1);
        assert_eq!(snap.records_created, 2);
        assert_eq!(snap.records_updated, 1);
    }

    #[test]
    fn concurrent_updates() {
        let stats = Arc::new(StoreStats::default());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_notifications(2);
                        s.record_write_conflict();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.notifications, 1600);
        assert_eq!(snap.write_conflicts, 800);
    }
}
