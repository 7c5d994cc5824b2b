//! Scalar column values and strongly-typed identities.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single scalar column value.
///
/// Values are totally ordered and hashable so they can key rows, be compared
/// during diffing and participate in content fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Identity of an entity or aggregate root within its type.
///
/// Equality is by wrapped value; the owning type name is carried separately
/// (see [`EntityKey`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Value);

impl Identity {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Create a fresh identity.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing identities explicitly in
    /// tests for determinism.
    pub fn generate() -> Self {
        Self(Value::Uuid(Uuid::now_v7()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl core::fmt::Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Value> for Identity {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<i64> for Identity {
    fn from(value: i64) -> Self {
        Self(Value::Int(value))
    }
}

impl From<i32> for Identity {
    fn from(value: i32) -> Self {
        Self(Value::from(value))
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(Value::from(value))
    }
}

impl From<Uuid> for Identity {
    fn from(value: Uuid) -> Self {
        Self(Value::Uuid(value))
    }
}

/// An identity qualified by its type name; unique within one aggregate graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub type_name: String,
    pub identity: Identity,
}

impl EntityKey {
    pub fn new(type_name: impl Into<String>, identity: Identity) -> Self {
        Self {
            type_name: type_name.into(),
            identity,
        }
    }
}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.type_name, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_is_by_wrapped_value() {
        assert_eq!(Identity::from(7), Identity::new(Value::Int(7)));
        assert_ne!(Identity::from(7), Identity::from("7"));
    }

    #[test]
    fn generated_identities_are_distinct() {
        assert_ne!(Identity::generate(), Identity::generate());
    }

    #[test]
    fn option_converts_to_null() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn entity_key_displays_type_and_identity() {
        let key = EntityKey::new("Order", Identity::from(42));
        assert_eq!(key.to_string(), "Order#42");
    }
}
