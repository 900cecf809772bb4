//! Feature flag commands.

use objdb_core::{FlagBinding, Store};
use std::path::Path;

/// What to do with the flags of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print every flag.
    List,
    /// Print one flag.
    Get(String),
    /// Set one flag.
    Set(String, bool),
    /// Invert one flag.
    Toggle(String),
}

/// Runs a flag command against the store at `path`.
pub fn run(path: &Path, action: Action) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open_existing(path)?;
    let lines = apply(&store, action);
    store.close()?;
    for line in lines? {
        println!("{line}");
    }
    Ok(())
}

/// Applies `action` and returns the lines to print.
pub fn apply(store: &Store, action: Action) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let flags = FlagBinding::new(store)?;
    let lines = match action {
        Action::List => flags
            .flags()?
            .into_iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect(),
        Action::Get(name) => match flags.read_flag(&name) {
            Some(value) => vec![format!("{name} = {value}")],
            None => return Err(format!("no flag named {name}").into()),
        },
        Action::Set(name, value) => {
            flags.write_flag(&name, value)?;
            tracing::info!(flag = %name, value, "flag set");
            vec![format!("{name} = {value}")]
        }
        Action::Toggle(name) => {
            let value = flags.toggle_flag(&name)?;
            tracing::info!(flag = %name, value, "flag toggled");
            vec![format!("{name} = {value}")]
        }
    };
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_core::feature_flags;

    fn store() -> Store {
        Store::open_in_memory([feature_flags::schema()], |tx| {
            feature_flags::seed_with(tx, [("beta", true), ("alpha", false)])
        })
        .unwrap()
    }

    #[test]
    fn list_is_sorted_by_name() {
        let lines = apply(&store(), Action::List).unwrap();
        assert_eq!(lines, ["alpha = false", "beta = true"]);
    }

    #[test]
    fn set_and_toggle() {
        let store = store();
        apply(&store, Action::Set("alpha".into(), true)).unwrap();
        let lines = apply(&store, Action::Toggle("beta".into())).unwrap();
        assert_eq!(lines, ["beta = false"]);
        assert_eq!(apply(&store, Action::Get("alpha".into())).unwrap(), ["alpha = true"]);
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let store = store();
        assert!(apply(&store, Action::Get("gamma".into())).is_err());
        assert!(apply(&store, Action::Set("gamma".into(), true)).is_err());
    }
}
