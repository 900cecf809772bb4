//! Fault-injecting backend wrapper.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultState {
    /// Appends allowed before the next injected failure; `u64::MAX` = unlimited.
    appends_left: AtomicU64,
    fail_flush: AtomicBool,
    syncs: AtomicU64,
}

/// Controls the failures of a [`FaultyBackend`] from outside the store that
/// owns it.
#[derive(Debug, Clone)]
pub struct FaultHandle {
    state: Arc<FaultState>,
}

impl FaultHandle {
    /// Lets `count` more appends succeed, then fails every append.
    pub fn fail_appends_after(&self, count: u64) {
        self.state.appends_left.store(count, Ordering::SeqCst);
    }

    /// Fails every flush until [`FaultHandle::heal`] is called.
    pub fn fail_flushes(&self) {
        self.state.fail_flush.store(true, Ordering::SeqCst);
    }

    /// Number of successful syncs so far.
    pub fn sync_count(&self) -> u64 {
        self.state.syncs.load(Ordering::SeqCst)
    }

    /// Clears all armed failures.
    pub fn heal(&self) {
        self.state.appends_left.store(u64::MAX, Ordering::SeqCst);
        self.state.fail_flush.store(false, Ordering::SeqCst);
    }
}

/// A backend that delegates to another one and fails when told to.
///
/// Reads, truncation and `replace` are never failed, so the owner can always
/// clean up after an injected write failure.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<FaultState>,
}

impl FaultyBackend {
    /// Wraps `inner`. Nothing fails until the returned handle is armed.
    pub fn wrap(inner: Box<dyn StorageBackend>) -> (Self, FaultHandle) {
        let state = Arc::new(FaultState::default());
        state.appends_left.store(u64::MAX, Ordering::SeqCst);
        let handle = FaultHandle {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, handle)
    }
}

impl std::fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let allowed = self
            .state
            .appends_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u64::MAX => Some(u64::MAX),
                n => Some(n - 1),
            });
        if allowed.is_err() {
            return Err(StorageError::Injected("append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_flush.load(Ordering::SeqCst) {
            return Err(StorageError::Injected("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush()?;
        self.inner.sync()?;
        self.state.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.inner.replace(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[test]
    fn passes_through_until_armed() {
        let (mut backend, _handle) = FaultyBackend::wrap(Box::new(InMemoryBackend::new()));
        backend.append(b"abc").unwrap();
        backend.flush().unwrap();
        assert_eq!(backend.read_all().unwrap(), b"abc");
    }

    #[test]
    fn fails_after_budget_and_heals() {
        let (mut backend, handle) = FaultyBackend::wrap(Box::new(InMemoryBackend::new()));
        handle.fail_appends_after(1);

        backend.append(b"one").unwrap();
        assert!(matches!(
            backend.append(b"two"),
            Err(StorageError::Injected("append"))
        ));

        handle.heal();
        backend.append(b"three").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"onethree");
    }

    #[test]
    fn flush_failure() {
        let (mut backend, handle) = FaultyBackend::wrap(Box::new(InMemoryBackend::new()));
        handle.fail_flushes();
        assert!(backend.flush().is_err());
        assert!(backend.sync().is_err());
        assert_eq!(handle.sync_count(), 0);

        handle.heal();
        backend.sync().unwrap();
        assert_eq!(handle.sync_count(), 1);
    }
}
