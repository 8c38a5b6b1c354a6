//! Scalar attribute values and the ordered maps that carry them.
//!
//! Entity snapshots, step parameters and template params are all flat maps
//! from attribute name to a tagged scalar. Keeping the value type closed
//! (no nested objects or arrays) keeps template rendering total and
//! predictable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered map from attribute name to scalar value.
///
/// `BTreeMap` keeps keys sorted so serialized tasks are byte-stable.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// A single scalar attribute value.
///
/// Serialized as the bare JSON scalar (`"x"`, `3`, `true`, `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl AttributeValue {
    /// Returns the inner string if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Convert an arbitrary JSON value into a scalar.
    ///
    /// Returns `None` for objects and arrays.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(AttributeValue::Null),
            serde_json::Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            serde_json::Value::Number(n) => Some(AttributeValue::Number(n.clone())),
            serde_json::Value::String(s) => Some(AttributeValue::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

/// Renders the value the way templates see it: strings verbatim, numbers in
/// JSON notation, booleans as `true`/`false`, null as the empty string.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => Ok(()),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Number(n.into())
    }
}

/// Flatten a JSON object into an `AttributeMap`.
///
/// Nested objects and arrays are stored as their compact JSON text so that
/// no attribute is silently dropped. Non-object input yields an empty map.
pub fn attributes_from_json(value: &serde_json::Value) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    if let serde_json::Value::Object(obj) = value {
        for (key, val) in obj {
            let attr = AttributeValue::from_json(val)
                .unwrap_or_else(|| AttributeValue::String(val.to_string()));
            attrs.insert(key.clone(), attr);
        }
    }
    attrs
}
