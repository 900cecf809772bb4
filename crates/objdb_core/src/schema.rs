//! Schema definitions and the registry built from them.
//!
//! A store is opened with a fixed list of [`SchemaDefinition`]s. The
//! [`SchemaRegistry`] validates them once, assigns every type a
//! [`CollectionId`] in declaration order and computes a fingerprint that
//! the manifest remembers, so a store cannot be reopened with a schema it
//! was not written with.
//!
//! ```rust,ignore
//! let flags = SchemaDefinition::new("FeatureFlags", "name")
//!     .property("name", PropertyType::String)
//!     .property("value", PropertyType::Bool);
//! let registry = SchemaRegistry::register([flags])?;
//! ```

use crate::error::{SchemaError, StoreError};
use crate::types::CollectionId;
use objdb_codec::{PrimaryKey, PropertyType, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// One declared property of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Declared value type.
    pub property_type: PropertyType,
}

/// The declaration of one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    name: String,
    primary_key: String,
    properties: Vec<PropertyDef>,
}

impl SchemaDefinition {
    /// Starts a definition whose primary key is the property `primary_key`.
    ///
    /// The key property still has to be declared with [`property`](Self::property).
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            properties: Vec::new(),
        }
    }

    /// Declares a property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            property_type,
        });
        self
    }

    /// The type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the primary-key property.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Declared properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    /// The declared type of `property`.
    #[must_use]
    pub fn property_type(&self, property: &str) -> Option<PropertyType> {
        self.properties
            .iter()
            .find(|p| p.name == property)
            .map(|p| p.property_type)
    }

    fn validate(&self) -> Result<PropertyType, SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::invalid_schema("", "type name is empty"));
        }
        if self.properties.is_empty() {
            return Err(SchemaError::invalid_schema(&self.name, "no properties declared"));
        }

        let mut seen = HashSet::new();
        for prop in &self.properties {
            if prop.name.is_empty() {
                return Err(SchemaError::invalid_schema(&self.name, "property name is empty"));
            }
            if !seen.insert(prop.name.as_str()) {
                return Err(SchemaError::invalid_schema(
                    &self.name,
                    format!("property `{}` declared twice", prop.name),
                ));
            }
        }

        let key_type = self.property_type(&self.primary_key).ok_or_else(|| {
            SchemaError::invalid_primary_key(&self.name, &self.primary_key, "not declared")
        })?;
        if !key_type.is_indexable() {
            return Err(SchemaError::invalid_primary_key(
                &self.name,
                &self.primary_key,
                format!("{key_type} properties are not indexable"),
            ));
        }
        Ok(key_type)
    }
}

/// A registered type: its definition plus the collection it lives in.
#[derive(Debug, Clone)]
pub struct ObjectType {
    id: CollectionId,
    definition: SchemaDefinition,
    key_type: PropertyType,
}

impl ObjectType {
    /// Collection holding records of this type.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// The type name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// The definition this type was registered from.
    #[must_use]
    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    /// Name of the primary-key property.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        self.definition.primary_key()
    }

    /// Type of the primary-key property.
    #[must_use]
    pub fn key_type(&self) -> PropertyType {
        self.key_type
    }

    /// The declared type of `property`.
    #[must_use]
    pub fn property_type(&self, property: &str) -> Option<PropertyType> {
        self.definition.property_type(property)
    }

    /// Checks that `key` has the type of this type's primary key.
    pub(crate) fn check_key(&self, key: &PrimaryKey) -> Result<(), StoreError> {
        let actual = key.to_value().property_type();
        if actual == self.key_type {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                type_name: self.name().to_string(),
                property: self.primary_key().to_string(),
                expected: self.key_type,
                actual,
            })
        }
    }

    /// Checks that `value` may be stored in `property`.
    pub(crate) fn check_value(&self, property: &str, value: &Value) -> Result<(), StoreError> {
        let expected = self
            .property_type(property)
            .ok_or_else(|| StoreError::unknown_property(self.name(), property))?;
        let actual = value.property_type();
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                type_name: self.name().to_string(),
                property: property.to_string(),
                expected,
                actual,
            })
        }
    }

    /// A record of this type with every property at its default.
    pub(crate) fn defaults(&self) -> BTreeMap<String, Value> {
        self.definition
            .properties()
            .iter()
            .map(|p| (p.name.clone(), p.property_type.default_value()))
            .collect()
    }
}

/// SHA-256 digest of a schema's canonical description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// The raw digest.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn of(types: &[ObjectType]) -> Self {
        let mut hasher = Sha256::new();
        for ty in types {
            hasher.update(format!("type {} key {}\n", ty.name(), ty.primary_key()).as_bytes());
            let mut props: Vec<_> = ty.definition.properties().iter().collect();
            props.sort_by(|a, b| a.name.cmp(&b.name));
            for prop in props {
                hasher.update(format!("  {}: {}\n", prop.name, prop.property_type).as_bytes());
            }
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The validated, immutable set of types a store was opened with.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    types: Vec<ObjectType>,
    by_name: HashMap<String, CollectionId>,
    fingerprint: Fingerprint,
}

impl SchemaRegistry {
    /// Validates `definitions` and builds the registry.
    ///
    /// # Errors
    ///
    /// - `DuplicateTypeName` if two definitions share a name
    /// - `InvalidPrimaryKey` if a key property is undeclared or not a
    ///   string or integer
    /// - `InvalidSchema` for empty names, empty types and repeated properties
    pub fn register(
        definitions: impl IntoIterator<Item = SchemaDefinition>,
    ) -> Result<Self, SchemaError> {
        let mut types = Vec::new();
        let mut by_name = HashMap::new();

        for definition in definitions {
            if by_name.contains_key(definition.name()) {
                return Err(SchemaError::DuplicateTypeName {
                    name: definition.name().to_string(),
                });
            }
            let key_type = definition.validate()?;
            let index = u32::try_from(types.len())
                .map_err(|_| SchemaError::invalid_schema(definition.name(), "too many types"))?;
            let id = CollectionId::new(index);
            by_name.insert(definition.name().to_string(), id);
            types.push(ObjectType {
                id,
                definition,
                key_type,
            });
        }

        let fingerprint = Fingerprint::of(&types);
        Ok(Self {
            types,
            by_name,
            fingerprint,
        })
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ObjectType> {
        self.by_name.get(name).map(|id| &self.types[id.index()])
    }

    /// Looks up a type by name, failing with `NoSuchType`.
    pub fn resolve(&self, name: &str) -> Result<&ObjectType, StoreError> {
        self.get(name).ok_or_else(|| StoreError::no_such_type(name))
    }

    /// Looks up a type by collection.
    #[must_use]
    pub fn by_id(&self, id: CollectionId) -> Option<&ObjectType> {
        self.types.get(id.index())
    }

    /// Registered types in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectType> {
        self.types.iter()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Fingerprint of the registered schema.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The definitions the registry was built from.
    #[must_use]
    pub fn definitions(&self) -> Vec<SchemaDefinition> {
        self.types.iter().map(|t| t.definition.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Bool)
    }

    #[test]
    fn assigns_ids_in_declaration_order() {
        let registry = SchemaRegistry::register([
            flags(),
            SchemaDefinition::new("Counter", "id").property("id", PropertyType::Int),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("FeatureFlags").unwrap().id(), CollectionId::new(0));
        assert_eq!(registry.get("Counter").unwrap().id(), CollectionId::new(1));
        assert_eq!(registry.by_id(CollectionId::new(1)).unwrap().name(), "Counter");
        assert_eq!(
            registry.resolve("Nope").unwrap_err(),
            StoreError::no_such_type("Nope")
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = SchemaRegistry::register([flags(), flags()]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateTypeName {
                name: "FeatureFlags".into()
            }
        );
    }

    #[test]
    fn rejects_bad_primary_keys() {
        let missing = SchemaDefinition::new("T", "id").property("value", PropertyType::Bool);
        assert!(matches!(
            SchemaRegistry::register([missing]),
            Err(SchemaError::InvalidPrimaryKey { .. })
        ));

        let double = SchemaDefinition::new("T", "id").property("id", PropertyType::Double);
        assert!(matches!(
            SchemaRegistry::register([double]),
            Err(SchemaError::InvalidPrimaryKey { .. })
        ));
    }

    #[test]
    fn rejects_malformed_definitions() {
        assert!(matches!(
            SchemaRegistry::register([SchemaDefinition::new("Empty", "id")]),
            Err(SchemaError::InvalidSchema { .. })
        ));
        let repeated = SchemaDefinition::new("T", "id")
            .property("id", PropertyType::Int)
            .property("id", PropertyType::Int);
        assert!(matches!(
            SchemaRegistry::register([repeated]),
            Err(SchemaError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn fingerprint_ignores_property_order_only() {
        let a = SchemaRegistry::register([flags()]).unwrap();
        let reordered = SchemaDefinition::new("FeatureFlags", "name")
            .property("value", PropertyType::Bool)
            .property("name", PropertyType::String);
        let b = SchemaRegistry::register([reordered]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let retyped = SchemaDefinition::new("FeatureFlags", "name")
            .property("name", PropertyType::String)
            .property("value", PropertyType::Int);
        let c = SchemaRegistry::register([retyped]).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().to_string().len(), 16);
    }

    #[test]
    fn value_checks() {
        let registry = SchemaRegistry::register([flags()]).unwrap();
        let ty = registry.get("FeatureFlags").unwrap();
        assert!(ty.check_value("value", &Value::Bool(true)).is_ok());
        assert!(matches!(
            ty.check_value("value", &Value::from("yes")),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ty.check_value("colour", &Value::Int(1)),
            Err(StoreError::UnknownProperty { .. })
        ));
        assert!(ty.check_key(&PrimaryKey::from("x")).is_ok());
        assert!(ty.check_key(&PrimaryKey::Int(1)).is_err());
        assert_eq!(ty.defaults().get("value"), Some(&Value::Bool(false)));
    }
}
