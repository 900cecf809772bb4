//! Property-based test generators using proptest.
//!
//! Provides strategies for flag names, property values and sequences of
//! flag operations, plus a [`FlagModel`] that predicts what a store must
//! contain after a sequence has been applied.

use objdb_core::{feature_flags, CoreResult, FlagBinding, PropertyType, Store, UpdateMode, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating flag names.
///
/// Names are drawn from a small alphabet so that generated operation
/// sequences hit the same keys often.
pub fn flag_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("flag[a-d]").expect("Invalid regex")
}

/// Strategy for generating a value of the given type.
pub fn value_strategy(property_type: PropertyType) -> BoxedStrategy<Value> {
    match property_type {
        PropertyType::String => prop::string::string_regex("[a-zA-Z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::String)
            .boxed(),
        PropertyType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        PropertyType::Int => any::<i64>().prop_map(Value::Int).boxed(),
        PropertyType::Double => (-1.0e9f64..1.0e9).prop_map(Value::Double).boxed(),
    }
}

/// One operation against the `FeatureFlags` collection.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagOp {
    /// Create a flag, failing if it exists.
    Create(String, bool),
    /// Set an existing flag.
    Set(String, bool),
    /// Delete an existing flag.
    Delete(String),
    /// Several operations in one transaction, all or nothing.
    Batch(Vec<FlagOp>),
}

fn single_op_strategy() -> impl Strategy<Value = FlagOp> {
    prop_oneof![
        (flag_name_strategy(), any::<bool>()).prop_map(|(n, v)| FlagOp::Create(n, v)),
        (flag_name_strategy(), any::<bool>()).prop_map(|(n, v)| FlagOp::Set(n, v)),
        flag_name_strategy().prop_map(FlagOp::Delete),
    ]
}

/// Strategy for generating a sequence of flag operations.
pub fn flag_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<FlagOp>> {
    let op = prop_oneof![
        3 => single_op_strategy(),
        1 => prop::collection::vec(single_op_strategy(), 1..5).prop_map(FlagOp::Batch),
    ];
    prop::collection::vec(op, 0..max_len)
}

/// Applies `op` to `store` in its own transaction.
pub fn apply_op(store: &Store, op: &FlagOp) -> CoreResult<()> {
    store.write(|tx| stage_op(tx, op))
}

fn stage_op(tx: &mut objdb_core::WriteTransaction<'_>, op: &FlagOp) -> CoreResult<()> {
    match op {
        FlagOp::Create(name, value) => {
            tx.create(
                feature_flags::TYPE_NAME,
                [
                    (feature_flags::NAME, Value::from(name.as_str())),
                    (feature_flags::VALUE, Value::Bool(*value)),
                ],
                UpdateMode::Never,
            )?;
            Ok(())
        }
        FlagOp::Set(name, value) => {
            let flag = tx
                .find(feature_flags::TYPE_NAME, name.as_str())?
                .ok_or_else(|| no_such_flag(name))?;
            tx.update(&flag, feature_flags::VALUE, *value)
        }
        FlagOp::Delete(name) => {
            let flag = tx
                .find(feature_flags::TYPE_NAME, name.as_str())?
                .ok_or_else(|| no_such_flag(name))?;
            tx.delete(&flag)
        }
        FlagOp::Batch(ops) => ops.iter().try_for_each(|op| stage_op(tx, op)),
    }
}

fn no_such_flag(name: &str) -> objdb_core::CoreError {
    objdb_core::StoreError::no_such_record(feature_flags::TYPE_NAME, name.into()).into()
}

/// Reference model of the `FeatureFlags` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagModel {
    flags: BTreeMap<String, bool>,
}

impl FlagModel {
    /// Creates a model holding `flags`.
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    /// Applies `op`, returning whether the store should accept it. A
    /// rejected operation leaves the model unchanged.
    pub fn apply(&mut self, op: &FlagOp) -> bool {
        let mut next = self.flags.clone();
        if Self::apply_to(&mut next, op) {
            self.flags = next;
            true
        } else {
            false
        }
    }

    fn apply_to(flags: &mut BTreeMap<String, bool>, op: &FlagOp) -> bool {
        match op {
            FlagOp::Create(name, value) => {
                if flags.contains_key(name) {
                    return false;
                }
                flags.insert(name.clone(), *value);
                true
            }
            FlagOp::Set(name, value) => match flags.get_mut(name) {
                Some(slot) => {
                    *slot = *value;
                    true
                }
                None => false,
            },
            FlagOp::Delete(name) => flags.remove(name).is_some(),
            FlagOp::Batch(ops) => ops.iter().all(|op| Self::apply_to(flags, op)),
        }
    }

    /// The modelled flags, ordered by name.
    pub fn flags(&self) -> Vec<(String, bool)> {
        self.flags.iter().map(|(n, v)| (n.clone(), *v)).collect()
    }

    /// Whether the store holds exactly the modelled flags.
    pub fn matches(&self, store: &Store) -> bool {
        FlagBinding::new(store)
            .and_then(|binding| binding.flags())
            .is_ok_and(|flags| flags == self.flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_values_have_requested_type(v in value_strategy(PropertyType::Double)) {
            prop_assert_eq!(v.property_type(), PropertyType::Double);
        }

        #[test]
        fn model_rejects_partial_batches(name in flag_name_strategy()) {
            let mut model = FlagModel::default();
            let batch = FlagOp::Batch(vec![
                FlagOp::Create(name.clone(), true),
                FlagOp::Set(format!("{name}x"), false),
            ]);
            prop_assert!(!model.apply(&batch));
            prop_assert!(model.flags().is_empty());
        }
    }
}
