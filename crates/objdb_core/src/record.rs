//! Records and the rules for building them from caller-supplied values.

use crate::error::StoreError;
use crate::schema::ObjectType;
use objdb_codec::{PrimaryKey, Value};
use std::collections::BTreeMap;

/// How `create` treats a key that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Fail with `KeyAlreadyExists`.
    #[default]
    Never,
    /// Upsert, overwriting only the supplied properties.
    Modified,
    /// Upsert, resetting every property that was not supplied.
    All,
}

/// A materialized object: its type, key and the value of every declared
/// property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    type_name: String,
    key: PrimaryKey,
    properties: BTreeMap<String, Value>,
}

impl Record {
    pub(crate) fn new(
        type_name: impl Into<String>,
        key: PrimaryKey,
        properties: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            key,
            properties,
        }
    }

    /// The record's type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The primary-key value.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Value of `property`, if declared.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property)
    }

    /// All property values, ordered by name.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub(crate) fn set(&mut self, property: &str, value: Value) {
        self.properties.insert(property.to_string(), value);
    }

    /// Names of the properties whose values differ in `newer`.
    #[must_use]
    pub fn changed_properties(&self, newer: &Record) -> Vec<String> {
        newer
            .properties
            .iter()
            .filter(|(name, value)| self.properties.get(*name) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Validated values for one `create` call.
#[derive(Debug)]
pub(crate) struct RecordInput {
    pub(crate) key: PrimaryKey,
    values: BTreeMap<String, Value>,
}

impl RecordInput {
    /// Checks every supplied value against `ty` and extracts the key.
    pub(crate) fn validate<I, K>(ty: &ObjectType, values: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut checked = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            ty.check_value(&name, &value)?;
            checked.insert(name, value);
        }

        let key_value = checked
            .get(ty.primary_key())
            .ok_or_else(|| StoreError::MissingPrimaryKey {
                type_name: ty.name().to_string(),
                property: ty.primary_key().to_string(),
            })?;
        let key = PrimaryKey::try_from(key_value).map_err(|_| StoreError::TypeMismatch {
            type_name: ty.name().to_string(),
            property: ty.primary_key().to_string(),
            expected: ty.key_type(),
            actual: key_value.property_type(),
        })?;

        Ok(Self {
            key,
            values: checked,
        })
    }

    /// Builds the record that results from applying this input.
    ///
    /// `existing` is the current record under the same key, if any.
    pub(crate) fn into_record(
        self,
        ty: &ObjectType,
        existing: Option<&Record>,
        mode: UpdateMode,
    ) -> Record {
        let mut properties = match (existing, mode) {
            (Some(current), UpdateMode::Modified) => current.properties.clone(),
            _ => ty.defaults(),
        };
        properties.extend(self.values);
        Record::new(ty.name(), self.key, properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaDefinition, SchemaRegistry};
    use objdb_codec::PropertyType;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::register([SchemaDefinition::new("Setting", "name")
            .property("name", PropertyType::String)
            .property("enabled", PropertyType::Bool)
            .property("weight", PropertyType::Double)])
        .unwrap()
    }

    #[test]
    fn missing_properties_get_defaults() {
        let registry = registry();
        let ty = registry.get("Setting").unwrap();
        let input = RecordInput::validate(ty, [("name", Value::from("a"))]).unwrap();
        let record = input.into_record(ty, None, UpdateMode::Never);

        assert_eq!(record.key(), &PrimaryKey::from("a"));
        assert_eq!(record.get("enabled"), Some(&Value::Bool(false)));
        assert_eq!(record.get("weight"), Some(&Value::Double(0.0)));
    }

    #[test]
    fn modified_keeps_unsupplied_and_all_resets_them() {
        let registry = registry();
        let ty = registry.get("Setting").unwrap();
        let existing = RecordInput::validate(
            ty,
            [
                ("name", Value::from("a")),
                ("enabled", Value::Bool(true)),
                ("weight", Value::Double(2.5)),
            ],
        )
        .unwrap()
        .into_record(ty, None, UpdateMode::Never);

        let patch = || {
            RecordInput::validate(
                ty,
                [("name", Value::from("a")), ("weight", Value::Double(1.0))],
            )
            .unwrap()
        };

        let modified = patch().into_record(ty, Some(&existing), UpdateMode::Modified);
        assert_eq!(modified.get("enabled"), Some(&Value::Bool(true)));
        assert_eq!(modified.get("weight"), Some(&Value::Double(1.0)));

        let all = patch().into_record(ty, Some(&existing), UpdateMode::All);
        assert_eq!(all.get("enabled"), Some(&Value::Bool(false)));
        assert_eq!(existing.changed_properties(&all), vec!["enabled", "weight"]);
    }

    #[test]
    fn key_is_required() {
        let registry = registry();
        let ty = registry.get("Setting").unwrap();
        let err = RecordInput::validate(ty, [("enabled", Value::Bool(true))]).unwrap_err();
        assert!(matches!(err, StoreError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn values_are_type_checked() {
        let registry = registry();
        let ty = registry.get("Setting").unwrap();
        let err = RecordInput::validate(ty, [("name", Value::Int(3))]).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }
}
