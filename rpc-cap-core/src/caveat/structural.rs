//! Structural comparison of JSON values.

use serde_json::Value;

/// Returns true if every element of `subset` appears in `superset` at the
/// same array index or object key.
///
/// Nested arrays and objects are compared recursively with the same rule;
/// scalars must be equal. Top-level scalars are never subsets of anything.
pub fn is_subset(subset: &Value, superset: &Value) -> bool {
    match (subset, superset) {
        (Value::Array(sub), Value::Array(sup)) => sub
            .iter()
            .enumerate()
            .all(|(i, item)| sup.get(i).is_some_and(|other| matches(item, other))),
        (Value::Object(sub), Value::Object(sup)) => sub
            .iter()
            .all(|(key, item)| sup.get(key).is_some_and(|other| matches(item, other))),
        _ => false,
    }
}

fn matches(item: &Value, other: &Value) -> bool {
    match (item, other) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            is_subset(item, other)
        }
        _ => item == other,
    }
}
