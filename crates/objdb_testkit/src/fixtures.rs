//! Test fixtures and store helpers.
//!
//! Every fixture store carries the `FeatureFlags` and `Counter` types and
//! is seeded on first open with [`TEST_FLAGS`], all switched off.

use objdb_core::{feature_flags, CoreResult, PropertyType, SchemaDefinition, Store, WriteTransaction};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The flag every scenario starts from.
pub const EXPERIMENTAL_FLAG: &str = "enableExperimentalFeature1";

/// Flags seeded into every fixture store.
pub const TEST_FLAGS: [&str; 3] = [EXPERIMENTAL_FLAG, "enableDarkMode", "enableBetaSync"];

/// Type name of the counter records used by concurrency tests.
pub const COUNTER: &str = "Counter";

/// Schema of `Counter`: an integer id and an integer count.
pub fn counter_schema() -> SchemaDefinition {
    SchemaDefinition::new(COUNTER, "id")
        .property("id", PropertyType::Int)
        .property("count", PropertyType::Int)
}

/// The schemas of every fixture store.
pub fn test_schemas() -> Vec<SchemaDefinition> {
    vec![feature_flags::schema(), counter_schema()]
}

/// The first-open seed of every fixture store.
pub fn seed_test_flags(tx: &mut WriteTransaction<'_>) -> CoreResult<()> {
    feature_flags::seed(tx, TEST_FLAGS)
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Store::open_in_memory(test_schemas(), seed_test_flags)
                .expect("Failed to open in-memory store"),
            _temp_dir: None,
        }
    }

    /// Creates a new store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(test_schemas(), temp_dir.path().join("store"), seed_test_flags)
            .expect("Failed to open file store");
        Self {
            store,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes the store and opens it again from the same directory, the
    /// way a restarted process would.
    ///
    /// # Panics
    ///
    /// For in-memory stores, which do not survive a close.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file stores can be reopened");
        self.store.close().expect("Failed to close store");
        let store = Store::open(test_schemas(), &path, seed_test_flags).expect("Failed to reopen store");
        Self {
            store,
            _temp_dir: self._temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use objdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         assert_eq!(store.count("FeatureFlags").unwrap(), 3);
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a store in a temporary directory.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let test_store = TestStore::memory();
        assert_eq!(test_store.count(feature_flags::TYPE_NAME).unwrap(), TEST_FLAGS.len());
        assert!(test_store.path().is_none());
    }

    #[test]
    fn test_file_store_reopens() {
        let test_store = TestStore::file();
        assert!(test_store.path().unwrap().is_dir());
        let generation = test_store.generation();
        let test_store = test_store.reopen();
        assert_eq!(test_store.generation(), generation);
        assert_eq!(test_store.count(feature_flags::TYPE_NAME).unwrap(), TEST_FLAGS.len());
    }

    #[test]
    fn test_with_temp_store() {
        let count = with_temp_store(|store| store.count(COUNTER).unwrap());
        assert_eq!(count, 0);
    }
}
