//! Value utility functions shared across modules
//!
//! Nested field access and JSON value comparison used by the query
//! engine and the aggregation pipeline.

use serde_json::Value;
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support
///
/// Supports simple fields ("name"), nested objects ("address.city") and
/// array indexing ("items.0.name").
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    // Fast path: no dots means simple field access
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                if let Ok(index) = part.parse::<usize>() {
                    value = arr.get(index)?;
                } else {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Compare two JSON values
///
/// Returns `Some(Ordering)` for comparable types (numbers, strings,
/// booleans, null), `None` for incompatible types (e.g. string vs number).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64()?;
            let y = y.as_f64()?;
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Equality with numeric coercion (1 == 1.0), falling back to
/// deep structural equality for arrays and objects.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}
