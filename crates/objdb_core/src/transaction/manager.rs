//! Transaction manager.

use crate::error::StoreError;
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// How to wait for the write slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// Wait as long as it takes.
    Block,
    /// Fail with `WriteConflict` if the slot is taken.
    Fail,
    /// Wait at most this long.
    Timeout(Duration),
}

#[derive(Debug, Default)]
struct WriterSlot {
    /// Thread holding the write transaction.
    owner: Option<ThreadId>,
    /// Set while the owner delivers change notifications.
    delivering: bool,
    /// Tickets of blocked writers, in arrival order.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl WriterSlot {
    fn is_turn_of(&self, ticket: u64) -> bool {
        self.owner.is_none() && self.queue.front() == Some(&ticket)
    }
}

/// Grants the single write slot of a store.
///
/// ## Single-Writer Guarantee
///
/// Exactly one thread holds the slot between `acquire` and `release`.
/// Blocked writers are served first come, first served. The slot is tied to
/// the acquiring thread so that a second `acquire` from the same thread is
/// reported as nesting (or as re-entry from a change callback) instead of
/// deadlocking.
pub(crate) struct TransactionManager {
    slot: Mutex<WriterSlot>,
    released: Condvar,
    next_txid: AtomicU64,
}

impl TransactionManager {
    /// Creates a manager whose first transaction gets `next_txid`.
    pub(crate) fn new(next_txid: u64) -> Self {
        Self {
            slot: Mutex::new(WriterSlot::default()),
            released: Condvar::new(),
            next_txid: AtomicU64::new(next_txid.max(1)),
        }
    }

    /// Takes the write slot for the calling thread.
    ///
    /// # Errors
    ///
    /// - `NestedTransaction` if the calling thread already holds the slot
    /// - `ReentrantWrite` if it holds the slot to deliver notifications
    /// - `WriteConflict` if the slot is taken and `mode` does not wait, or
    ///   the timeout expires
    pub(crate) fn acquire(&self, mode: Acquire) -> Result<TransactionId, StoreError> {
        let me = thread::current().id();
        let mut slot = self.slot.lock();

        if slot.owner == Some(me) {
            return Err(if slot.delivering {
                StoreError::ReentrantWrite
            } else {
                StoreError::NestedTransaction
            });
        }

        if slot.owner.is_none() && slot.queue.is_empty() {
            slot.owner = Some(me);
            return Ok(self.next_id());
        }

        let deadline = match mode {
            Acquire::Fail => return Err(StoreError::WriteConflict),
            Acquire::Block => None,
            Acquire::Timeout(wait) => Some(Instant::now() + wait),
        };

        let ticket = slot.next_ticket;
        slot.next_ticket += 1;
        slot.queue.push_back(ticket);

        loop {
            if slot.is_turn_of(ticket) {
                slot.queue.pop_front();
                slot.owner = Some(me);
                return Ok(self.next_id());
            }

            match deadline {
                None => self.released.wait(&mut slot),
                Some(deadline) => {
                    let timed_out = self.released.wait_until(&mut slot, deadline).timed_out();
                    if timed_out && !slot.is_turn_of(ticket) {
                        slot.queue.retain(|t| *t != ticket);
                        drop(slot);
                        // The next ticket may now be at the front.
                        self.released.notify_all();
                        return Err(StoreError::WriteConflict);
                    }
                }
            }
        }
    }

    /// Whether the calling thread holds the write slot.
    pub(crate) fn is_writer(&self) -> bool {
        self.slot.lock().owner == Some(thread::current().id())
    }

    /// Marks the start of change delivery by the slot owner.
    pub(crate) fn begin_delivery(&self) {
        self.slot.lock().delivering = true;
    }

    /// Frees the write slot and wakes the next waiter.
    pub(crate) fn release(&self) {
        {
            let mut slot = self.slot.lock();
            slot.owner = None;
            slot.delivering = false;
        }
        self.released.notify_all();
    }

    /// Number of writers currently waiting.
    pub(crate) fn waiting(&self) -> usize {
        self.slot.lock().queue.len()
    }

    fn next_id(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.next_txid.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Releases the write slot when dropped.
pub(crate) struct SlotGuard<'a>(pub(crate) &'a TransactionManager);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};

    #[test]
    fn ids_increase() {
        let tm = TransactionManager::new(5);
        let first = tm.acquire(Acquire::Block).unwrap();
        tm.release();
        let second = tm.acquire(Acquire::Block).unwrap();
        tm.release();
        assert_eq!(first, TransactionId::new(5));
        assert!(second > first);
    }

    #[test]
    fn same_thread_is_nested_or_reentrant() {
        let tm = TransactionManager::new(1);
        tm.acquire(Acquire::Block).unwrap();
        assert_eq!(tm.acquire(Acquire::Block), Err(StoreError::NestedTransaction));

        tm.begin_delivery();
        assert_eq!(tm.acquire(Acquire::Fail), Err(StoreError::ReentrantWrite));

        tm.release();
        assert!(!tm.is_writer());
    }

    #[test]
    fn fail_and_timeout_report_conflict() {
        let tm = Arc::new(TransactionManager::new(1));
        tm.acquire(Acquire::Block).unwrap();

        let other = Arc::clone(&tm);
        let results = thread::spawn(move || {
            (
                other.acquire(Acquire::Fail),
                other.acquire(Acquire::Timeout(Duration::from_millis(20))),
                other.waiting(),
            )
        })
        .join()
        .unwrap();

        assert_eq!(results.0, Err(StoreError::WriteConflict));
        assert_eq!(results.1, Err(StoreError::WriteConflict));
        assert_eq!(results.2, 0);
        tm.release();
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let tm = Arc::new(TransactionManager::new(1));
        tm.acquire(Acquire::Block).unwrap();

        let (tx, rx) = mpsc::channel();
        let mut workers = Vec::new();
        for n in 0..4 {
            // Queue the workers one at a time so arrival order is known.
            let tm2 = Arc::clone(&tm);
            let tx = tx.clone();
            workers.push(thread::spawn(move || {
                tm2.acquire(Acquire::Block).unwrap();
                tx.send(n).unwrap();
                tm2.release();
            }));
            while tm.waiting() < n + 1 {
                thread::yield_now();
            }
        }

        tm.release();
        for w in workers {
            w.join().unwrap();
        }
        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
