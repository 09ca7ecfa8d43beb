//! Binary attachment handling.
//!
//! Deconstruction walks a data tree depth-first, replaces every binary leaf
//! with `{"_placeholder": true, "num": N}` and collects the leaves in
//! encounter order. Reconstruction substitutes them back.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;

use crate::error::{Error, Result};

use super::value::Value;

// ============================================================================
// Constants
// ============================================================================

/// Marker key of a placeholder object.
const PLACEHOLDER_KEY: &str = "_placeholder";

/// Index key of a placeholder object.
const NUM_KEY: &str = "num";

// ============================================================================
// Deconstruction
// ============================================================================

/// Replaces binary leaves with placeholders.
///
/// Returns the rewritten tree and the extracted buffers, where buffer `N`
/// belongs to the placeholder with `num == N`.
#[must_use]
pub fn deconstruct(data: Value) -> (Value, Vec<Bytes>) {
    let mut buffers = Vec::new();
    let data = deconstruct_into(data, &mut buffers);
    (data, buffers)
}

fn deconstruct_into(data: Value, buffers: &mut Vec<Bytes>) -> Value {
    match data {
        Value::Binary(bytes) => {
            let num = buffers.len() as u64;
            buffers.push(bytes);
            Value::Object(vec![
                (PLACEHOLDER_KEY.to_string(), Value::Bool(true)),
                (NUM_KEY.to_string(), Value::from(num)),
            ])
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| deconstruct_into(item, buffers))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, deconstruct_into(v, buffers)))
                .collect(),
        ),
        other => other,
    }
}

// ============================================================================
// Reconstruction
// ============================================================================

/// Substitutes placeholders with their buffers.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when a placeholder points outside `buffers`.
pub fn reconstruct(data: Value, buffers: &[Bytes]) -> Result<Value> {
    match data {
        Value::Object(entries) if is_placeholder(&entries) => {
            let index = entries
                .iter()
                .find(|(k, _)| k == NUM_KEY)
                .and_then(|(_, v)| match v {
                    Value::Number(n) => n.as_u64(),
                    _ => None,
                })
                .and_then(|n| usize::try_from(n).ok())
                .filter(|&n| n < buffers.len())
                .ok_or_else(|| Error::protocol("illegal attachments"))?;
            Ok(Value::Binary(buffers[index].clone()))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| reconstruct(item, buffers))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(entries) => entries
            .into_iter()
            .map(|(k, v)| reconstruct(v, buffers).map(|v| (k, v)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

fn is_placeholder(entries: &[(String, Value)]) -> bool {
    entries
        .iter()
        .any(|(k, v)| k == PLACEHOLDER_KEY && *v == Value::Bool(true))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn sample_tree() -> Value {
        Value::Array(vec![
            Value::from("upload"),
            Value::Object(vec![
                ("name".into(), Value::from("a.bin")),
                ("head".into(), Value::from(vec![1u8, 2, 3])),
                (
                    "parts".into(),
                    Value::Array(vec![Value::from(vec![4u8]), Value::from(7i64)]),
                ),
            ]),
            Value::from(vec![5u8, 6]),
        ])
    }

    #[test]
    fn test_deconstruct_collects_leaves_depth_first() {
        let (data, buffers) = deconstruct(sample_tree());
        assert_eq!(
            buffers,
            vec![
                Bytes::from_static(&[1, 2, 3]),
                Bytes::from_static(&[4]),
                Bytes::from_static(&[5, 6]),
            ]
        );
        assert_eq!(
            data.to_json(),
            json!([
                "upload",
                {
                    "name": "a.bin",
                    "head": {"_placeholder": true, "num": 0},
                    "parts": [{"_placeholder": true, "num": 1}, 7]
                },
                {"_placeholder": true, "num": 2}
            ])
        );
        assert!(!data.has_binary());
    }

    #[test]
    fn test_reconstruct_is_lossless() {
        let tree = sample_tree();
        let (data, buffers) = deconstruct(tree.clone());
        assert_eq!(reconstruct(data, &buffers).unwrap(), tree);
    }

    #[test]
    fn test_reconstruct_rejects_out_of_range_index() {
        let data = Value::from(json!([{"_placeholder": true, "num": 3}]));
        assert!(reconstruct(data, &[Bytes::from_static(b"x")]).is_err());

        let data = Value::from(json!([{"_placeholder": true, "num": "0"}]));
        assert!(reconstruct(data, &[Bytes::from_static(b"x")]).is_err());
    }
}
