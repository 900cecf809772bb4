//! Stress helpers for contended writers.
//!
//! These drive several threads through the single write slot at once and
//! report how many transactions went through.

use crate::fixtures::COUNTER;
use objdb_core::{CoreResult, Store, UpdateMode, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            duration,
        }
    }

    /// Transactions per second.
    pub fn ops_per_second(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.total_ops as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transactions per thread.
    pub writes_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            writes_per_thread: 250,
        }
    }
}

/// Creates the counter `id` at zero if it does not exist yet.
pub fn ensure_counter(store: &Store, id: i64) -> CoreResult<()> {
    store.write(|tx| {
        if tx.find(COUNTER, id)?.is_none() {
            tx.create(
                COUNTER,
                [("id", Value::Int(id)), ("count", Value::Int(0))],
                UpdateMode::Never,
            )?;
        }
        Ok(())
    })
}

/// Reads the counter `id`, or zero if it does not exist.
pub fn read_counter(store: &Store, id: i64) -> CoreResult<i64> {
    Ok(store
        .get(COUNTER, id)?
        .and_then(|r| r.get("count").and_then(Value::as_int))
        .unwrap_or(0))
}

/// Increments counter `id` by one, read-modify-write inside one
/// transaction.
pub fn increment_counter(store: &Store, id: i64) -> CoreResult<i64> {
    store.write(|tx| {
        let counter = tx
            .find(COUNTER, id)?
            .ok_or_else(|| objdb_core::StoreError::no_such_record(COUNTER, id.into()))?;
        let next = counter.get("count").and_then(|v| v.as_int()).unwrap_or(0) + 1;
        tx.update(&counter, "count", next)?;
        Ok(next)
    })
}

/// Runs `threads` writers that each increment the same counter
/// `writes_per_thread` times.
///
/// With a serializable writer the counter ends at exactly the number of
/// successful transactions.
pub fn stress_contended_increments(store: &Store, config: &StressConfig) -> StressTestResult {
    let counter_id = 1;
    if ensure_counter(store, counter_id).is_err() {
        return StressTestResult::new(0, config.threads * config.writes_per_thread, Duration::ZERO);
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let store = store.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let writes = config.writes_per_thread;

            thread::spawn(move || {
                for _ in 0..writes {
                    match increment_counter(&store, counter_id) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    #[test]
    fn contended_increments_are_serialized() {
        let store = TestStore::memory();
        let config = StressConfig {
            threads: 4,
            writes_per_thread: 50,
        };
        let result = stress_contended_increments(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);
        assert_eq!(read_counter(&store, 1).unwrap(), 200);
    }
}
