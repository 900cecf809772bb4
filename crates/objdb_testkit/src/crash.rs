//! Crash and restart simulation.
//!
//! A [`MemoryDisk`] holds the WAL and checkpoint image of a store in
//! memory. Stores opened on it write through to the shared bytes, so a
//! test can copy the disk at any moment, without closing the store, and
//! open the copy as if the process had died right there.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objdb_testkit::crash::MemoryDisk;
//!
//! let disk = MemoryDisk::new();
//! let store = disk.open().unwrap();
//! // ... commit something
//! let after_crash = disk.crash_image().open().unwrap();
//! ```

use crate::fixtures::{seed_test_flags, test_schemas};
use objdb_core::{Config, CoreResult, Store};
use objdb_storage::{FaultHandle, FaultyBackend, InMemoryBackend};

/// The persistent bytes of one store, kept in memory.
#[derive(Debug, Default)]
pub struct MemoryDisk {
    wal: InMemoryBackend,
    images: InMemoryBackend,
}

impl MemoryDisk {
    /// Creates an empty disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fixture store on this disk with the default configuration.
    pub fn open(&self) -> CoreResult<Store> {
        self.open_with(Config::default())
    }

    /// Opens a fixture store on this disk.
    pub fn open_with(&self, config: Config) -> CoreResult<Store> {
        Store::builder(test_schemas())
            .backends(Box::new(self.wal.share()), Box::new(self.images.share()))
            .config(config)
            .on_first_open(seed_test_flags)
            .open()
    }

    /// Opens a fixture store whose WAL writes fail on command.
    pub fn open_faulty(&self) -> CoreResult<(Store, FaultHandle)> {
        let (wal, faults) = FaultyBackend::wrap(Box::new(self.wal.share()));
        let store = Store::builder(test_schemas())
            .backends(Box::new(wal), Box::new(self.images.share()))
            .on_first_open(seed_test_flags)
            .open()?;
        Ok((store, faults))
    }

    /// A copy of the disk as it is right now.
    pub fn crash_image(&self) -> Self {
        Self {
            wal: InMemoryBackend::with_data(self.wal.data()),
            images: InMemoryBackend::with_data(self.images.data()),
        }
    }

    /// A copy of the disk with the last `cut` bytes of the WAL missing, as
    /// after a crash in the middle of a log write.
    pub fn torn_image(&self, cut: usize) -> Self {
        let mut wal = self.wal.data();
        wal.truncate(wal.len().saturating_sub(cut));
        Self {
            wal: InMemoryBackend::with_data(wal),
            images: InMemoryBackend::with_data(self.images.data()),
        }
    }

    /// Current length of the WAL in bytes.
    pub fn wal_len(&self) -> usize {
        self.wal.data().len()
    }

    /// Current length of the checkpoint image in bytes.
    pub fn image_len(&self) -> usize {
        self.images.data().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{EXPERIMENTAL_FLAG, TEST_FLAGS};
    use objdb_core::{feature_flags, FlagBinding};

    #[test]
    fn crash_image_keeps_committed_writes() {
        let disk = MemoryDisk::new();
        let store = disk.open().unwrap();
        FlagBinding::new(&store).unwrap().write_flag(EXPERIMENTAL_FLAG, true).unwrap();

        let recovered = disk.crash_image().open().unwrap();
        let flags = FlagBinding::new(&recovered).unwrap();
        assert_eq!(flags.read_flag(EXPERIMENTAL_FLAG), Some(true));
        assert_eq!(recovered.count(feature_flags::TYPE_NAME).unwrap(), TEST_FLAGS.len());
    }

    #[test]
    fn uncommitted_writes_are_lost() {
        let disk = MemoryDisk::new();
        let store = disk.open().unwrap();
        let flags = FlagBinding::new(&store).unwrap();

        let tx = store.begin_write().unwrap();
        let flag = store.find(feature_flags::TYPE_NAME, EXPERIMENTAL_FLAG).unwrap().unwrap();
        flag.set(feature_flags::VALUE, true).unwrap();
        let image = disk.crash_image();
        tx.commit().unwrap();
        assert_eq!(flags.read_flag(EXPERIMENTAL_FLAG), Some(true));

        let recovered = image.open().unwrap();
        assert_eq!(
            FlagBinding::new(&recovered).unwrap().read_flag(EXPERIMENTAL_FLAG),
            Some(false)
        );
    }

    #[test]
    fn torn_commit_is_rolled_back() {
        let disk = MemoryDisk::new();
        let store = disk.open().unwrap();
        let before = disk.wal_len();
        FlagBinding::new(&store).unwrap().write_flag(EXPERIMENTAL_FLAG, true).unwrap();
        assert!(disk.wal_len() > before);

        let recovered = disk.torn_image(3).open().unwrap();
        assert_eq!(
            FlagBinding::new(&recovered).unwrap().read_flag(EXPERIMENTAL_FLAG),
            Some(false)
        );
    }
}
