//! Primary key values.

use crate::error::CodecError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value of a record's primary-key property.
///
/// Only string and integer properties can be primary keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimaryKey {
    /// A text key.
    String(String),
    /// An integer key.
    Int(i64),
}

impl PrimaryKey {
    /// Converts the key back into a property value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Int(n) => Value::Int(*n),
        }
    }
}

impl TryFrom<&Value> for PrimaryKey {
    type Error = CodecError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Int(n) => Ok(Self::Int(*n)),
            Value::Bool(_) => Err(CodecError::NotAKey { type_name: "bool" }),
            Value::Double(_) => Err(CodecError::NotAKey {
                type_name: "double",
            }),
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PrimaryKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_int_values_become_keys() {
        assert_eq!(
            PrimaryKey::try_from(&Value::from("flag")).unwrap(),
            PrimaryKey::from("flag")
        );
        assert_eq!(PrimaryKey::try_from(&Value::Int(7)).unwrap(), PrimaryKey::Int(7));
    }

    #[test]
    fn bool_and_double_are_rejected() {
        assert_eq!(
            PrimaryKey::try_from(&Value::Bool(true)),
            Err(CodecError::NotAKey { type_name: "bool" })
        );
        assert!(PrimaryKey::try_from(&Value::Double(1.5)).is_err());
    }

    #[test]
    fn key_converts_back_to_value() {
        let key = PrimaryKey::from("enableExperimentalFeature2");
        assert_eq!(key.to_value(), Value::from("enableExperimentalFeature2"));
        assert_eq!(key.to_string(), "enableExperimentalFeature2");
    }
}
