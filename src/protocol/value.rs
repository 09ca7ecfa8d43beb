//! Data tree carried by Socket.IO packets.
//!
//! Mirrors `serde_json::Value` with one extra leaf kind, [`Value::Binary`],
//! so event arguments can mix JSON data with raw byte buffers. Binary
//! leaves never reach the JSON encoder: they are swapped for placeholders
//! and sent as separate attachment frames (see [`super::binary`]).

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use serde_json::{Map, Number};

// ============================================================================
// Value
// ============================================================================

/// JSON-like value with binary leaves.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// `null`.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(Number),
    /// String.
    String(String),
    /// Raw bytes.
    Binary(Bytes),
    /// Array.
    Array(Vec<Value>),
    /// Object with insertion-ordered keys as provided by `serde_json`.
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Returns the string if this is a string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes if this is a binary leaf.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the array elements if this is an array.
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up an object key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns `true` if this is an object.
    #[inline]
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Returns `true` if any leaf of the tree is binary.
    #[must_use]
    pub fn has_binary(&self) -> bool {
        match self {
            Self::Binary(_) => true,
            Self::Array(items) => items.iter().any(Value::has_binary),
            Self::Object(entries) => entries.iter().any(|(_, v)| v.has_binary()),
            _ => false,
        }
    }

    /// Converts to JSON, replacing binary leaves with `null`.
    ///
    /// Callers that need binary data preserved deconstruct the tree first.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null | Self::Binary(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_from_json_and_back() {
        let json = json!({"a": [1, "two", null, true], "b": {"c": 1.5}});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
        assert!(!value.has_binary());
    }

    #[test]
    fn test_has_binary_finds_nested_leaf() {
        let value = Value::Array(vec![
            Value::from("x"),
            Value::Object(vec![("buf".into(), Value::from(vec![1u8, 2]))]),
        ]);
        assert!(value.has_binary());
    }

    #[test]
    fn test_get_object_key() {
        let value = Value::from(json!({"sid": "abc"}));
        assert_eq!(value.get("sid").and_then(Value::as_str), Some("abc"));
        assert!(value.get("missing").is_none());
        assert!(Value::Null.get("sid").is_none());
    }
}
