//! One-time seeding of a new store.
//!
//! The first time a store is opened, a seed function runs inside a write
//! transaction marked as the bootstrap transaction. Its commit writes a
//! `Bootstrapped` record to the WAL together with the seeded rows, so the
//! flag and the rows become durable atomically. From then on the seed never
//! runs again, even if the seeded rows are deleted later.
//!
//! Inside the bootstrap transaction, `create` with [`UpdateMode::Never`] on
//! an existing key keeps the existing record instead of failing.
//!
//! [`UpdateMode::Never`]: crate::UpdateMode::Never

use crate::error::CoreResult;
use crate::logging::store_log;
use crate::store::Store;
use crate::transaction::{Acquire, WriteTransaction};

/// Runs `seed` if `store` has never been bootstrapped.
///
/// Returns whether the seed ran. The bootstrap transaction always waits for
/// the write slot, regardless of the configured write policy.
///
/// # Errors
///
/// The error returned by `seed`, in which case nothing is committed and the
/// store stays unbootstrapped, or a commit error.
pub fn run_if_first_open<F>(store: &Store, seed: F) -> CoreResult<bool>
where
    F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<()>,
{
    let logger = &store.inner.logger;
    if store.is_bootstrapped() {
        store_log!(logger, Debug, Bootstrap, "store already bootstrapped");
        return Ok(false);
    }

    let mut tx = store.begin_with(Acquire::Block)?;
    // Another handle may have seeded while this one waited.
    if store.is_bootstrapped() {
        tx.rollback();
        return Ok(false);
    }

    tx.mark_seeding();
    if let Err(err) = seed(&mut tx) {
        store_log!(logger, Error, Bootstrap, "seed failed: {}", err);
        tx.rollback();
        return Err(err);
    }
    let generation = tx.commit()?;
    store_log!(logger, Info, Bootstrap, "bootstrapped at {}", generation);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UpdateMode;
    use crate::schema::SchemaDefinition;
    use objdb_codec::{PropertyType, Value};

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Bool)
    }

    fn seed_flag(tx: &mut WriteTransaction<'_>, name: &str) -> CoreResult<()> {
        tx.create(
            "FeatureFlags",
            [("name", Value::from(name)), ("value", Value::Bool(false))],
            UpdateMode::Never,
        )?;
        Ok(())
    }

    #[test]
    fn seed_runs_on_first_open_only() {
        let store = Store::open_in_memory([flags()], |tx| seed_flag(tx, "a")).unwrap();
        assert!(store.is_bootstrapped());
        assert_eq!(store.count("FeatureFlags").unwrap(), 1);

        let ran = run_if_first_open(&store, |tx| seed_flag(tx, "b")).unwrap();
        assert!(!ran);
        assert_eq!(store.count("FeatureFlags").unwrap(), 1);
    }

    #[test]
    fn existing_key_is_kept_while_seeding() {
        let store = Store::builder([flags()]).open().unwrap();
        // A record that predates the seed transaction.
        store
            .write(|tx| {
                tx.create(
                    "FeatureFlags",
                    [("name", Value::from("a")), ("value", Value::Bool(true))],
                    UpdateMode::All,
                )?;
                Ok(())
            })
            .unwrap();

        let mut tx = store.begin_write().unwrap();
        tx.mark_seeding();
        let kept = tx
            .create(
                "FeatureFlags",
                [("name", Value::from("a")), ("value", Value::Bool(false))],
                UpdateMode::Never,
            )
            .unwrap();
        assert_eq!(kept.get("value"), Some(Value::Bool(true)));
        tx.commit().unwrap();

        let record = store.get("FeatureFlags", "a").unwrap().unwrap();
        assert_eq!(record.get("value"), Some(&Value::Bool(true)));
    }

    #[test]
    fn failing_seed_commits_nothing() {
        let err = Store::open_in_memory([flags()], |tx| {
            seed_flag(tx, "a")?;
            Err(crate::error::StoreError::WriteConflict.into())
        })
        .unwrap_err();
        assert!(err.as_store_error().is_some());
    }

    #[test]
    fn open_without_seed_still_bootstraps() {
        let store = Store::builder([flags()]).open().unwrap();
        assert!(store.is_bootstrapped());
        assert_eq!(store.generation().as_u64(), 1);
        assert_eq!(store.count("FeatureFlags").unwrap(), 0);
    }
}
