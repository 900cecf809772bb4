//! The `FeatureFlags` type: named boolean switches.

use crate::error::CoreResult;
use crate::record::UpdateMode;
use crate::schema::SchemaDefinition;
use crate::transaction::WriteTransaction;
use objdb_codec::{PropertyType, Value};

/// Type name of feature flag records.
pub const TYPE_NAME: &str = "FeatureFlags";

/// Primary-key property holding the flag name.
pub const NAME: &str = "name";

/// Property holding the flag state.
pub const VALUE: &str = "value";

/// Schema of the `FeatureFlags` type.
#[must_use]
pub fn schema() -> SchemaDefinition {
    SchemaDefinition::new(TYPE_NAME, NAME)
        .property(NAME, PropertyType::String)
        .property(VALUE, PropertyType::Bool)
}

/// Seeds one flag per name, switched off.
///
/// Meant for the first-open seed: flags that already exist keep their
/// state.
///
/// # Errors
///
/// Errors from `create`.
pub fn seed<I, S>(tx: &mut WriteTransaction<'_>, names: I) -> CoreResult<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    seed_with(tx, names.into_iter().map(|name| (name, false)))
}

/// Seeds flags with explicit initial states.
///
/// # Errors
///
/// Errors from `create`.
pub fn seed_with<I, S>(tx: &mut WriteTransaction<'_>, flags: I) -> CoreResult<()>
where
    I: IntoIterator<Item = (S, bool)>,
    S: Into<String>,
{
    for (name, value) in flags {
        tx.create(
            TYPE_NAME,
            [(NAME, Value::String(name.into())), (VALUE, Value::Bool(value))],
            UpdateMode::Never,
        )?;
    }
    Ok(())
}
