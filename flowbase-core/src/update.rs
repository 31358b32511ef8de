// flowbase-core/src/update.rs
//! MongoDB-style update operators applied to stored documents
//!
//! Supported: $set, $inc, $unset, $push, $pull. A bare replacement
//! document (no operators) is rejected; only operator updates are
//! exposed.

use crate::document::Document;
use crate::error::{FlowBaseError, Result};
use crate::value_utils::values_equal;
use serde_json::Value;

/// Apply an update document to a single stored document.
///
/// Returns `true` if the document was modified.
pub fn apply_update(document: &mut Document, update_json: &Value) -> Result<bool> {
    let update_ops = match update_json {
        Value::Object(ops) if !ops.is_empty() => ops,
        Value::Object(_) => {
            return Err(FlowBaseError::InvalidUpdate(
                "Update document cannot be empty".to_string(),
            ))
        }
        _ => {
            return Err(FlowBaseError::InvalidUpdate(
                "Update document must be an object".to_string(),
            ))
        }
    };

    if let Some(bare) = update_ops.keys().find(|k| !k.starts_with('$')) {
        return Err(FlowBaseError::InvalidUpdate(format!(
            "Unexpected field '{}': updates must use operators like $set",
            bare
        )));
    }

    let mut was_modified = false;

    for (op, fields) in update_ops {
        let field_values = fields.as_object().ok_or_else(|| {
            FlowBaseError::InvalidUpdate(format!("{} requires an object of fields", op))
        })?;

        match op.as_str() {
            "$set" => {
                for (field, value) in field_values {
                    if field == "_id" {
                        return Err(FlowBaseError::InvalidUpdate(
                            "Cannot update the _id field".to_string(),
                        ));
                    }
                    if document.get(field) != Some(value) {
                        document.set(field.clone(), value.clone());
                        was_modified = true;
                    }
                }
            }
            "$inc" => {
                for (field, inc_value) in field_values {
                    match document.get(field) {
                        Some(current) => {
                            // Int arithmetic first to preserve integer types
                            if let (Some(curr_int), Some(inc_int)) =
                                (current.as_i64(), inc_value.as_i64())
                            {
                                document.set(field.clone(), Value::from(curr_int + inc_int));
                            } else if let (Some(curr_num), Some(inc_num)) =
                                (current.as_f64(), inc_value.as_f64())
                            {
                                document.set(field.clone(), Value::from(curr_num + inc_num));
                            } else {
                                return Err(FlowBaseError::InvalidUpdate(format!(
                                    "$inc: field '{}' is not numeric",
                                    field
                                )));
                            }
                            was_modified = true;
                        }
                        // Missing fields start from zero
                        None => {
                            if !inc_value.is_number() {
                                return Err(FlowBaseError::InvalidUpdate(format!(
                                    "$inc: increment for '{}' must be numeric",
                                    field
                                )));
                            }
                            document.set(field.clone(), inc_value.clone());
                            was_modified = true;
                        }
                    }
                }
            }
            "$unset" => {
                for (field, _) in field_values {
                    if document.remove(field).is_some() {
                        was_modified = true;
                    }
                }
            }
            "$push" => {
                for (field, value) in field_values {
                    let mut array = match document.get(field) {
                        Some(Value::Array(arr)) => arr.clone(),
                        Some(_) => {
                            return Err(FlowBaseError::InvalidUpdate(format!(
                                "$push: field '{}' is not an array",
                                field
                            )));
                        }
                        None => vec![],
                    };
                    array.push(value.clone());
                    document.set(field.clone(), Value::Array(array));
                    was_modified = true;
                }
            }
            "$pull" => {
                for (field, value) in field_values {
                    match document.get(field) {
                        Some(Value::Array(arr)) => {
                            let filtered: Vec<Value> = arr
                                .iter()
                                .filter(|item| !values_equal(item, value))
                                .cloned()
                                .collect();
                            if filtered.len() != arr.len() {
                                document.set(field.clone(), Value::Array(filtered));
                                was_modified = true;
                            }
                        }
                        Some(_) => {
                            return Err(FlowBaseError::InvalidUpdate(format!(
                                "$pull: field '{}' is not an array",
                                field
                            )));
                        }
                        None => {}
                    }
                }
            }
            other => {
                return Err(FlowBaseError::InvalidUpdate(format!(
                    "Unknown update operator: {}",
                    other
                )));
            }
        }
    }

    Ok(was_modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(&value).unwrap()
    }

    #[test]
    fn test_set_new_and_existing_field() {
        let mut d = doc(json!({"_id": 1, "name": "Alice"}));
        let modified = apply_update(&mut d, &json!({"$set": {"name": "Bob", "age": 30}})).unwrap();
        assert!(modified);
        assert_eq!(d.get("name").unwrap(), &json!("Bob"));
        assert_eq!(d.get("age").unwrap(), &json!(30));
    }

    #[test]
    fn test_set_same_value_not_modified() {
        let mut d = doc(json!({"_id": 1, "name": "Alice"}));
        let modified = apply_update(&mut d, &json!({"$set": {"name": "Alice"}})).unwrap();
        assert!(!modified);
    }

    #[test]
    fn test_set_id_rejected() {
        let mut d = doc(json!({"_id": 1}));
        let result = apply_update(&mut d, &json!({"$set": {"_id": 2}}));
        assert!(matches!(result, Err(FlowBaseError::InvalidUpdate(_))));
    }

    #[test]
    fn test_inc_preserves_integers() {
        let mut d = doc(json!({"_id": 1, "count": 5}));
        apply_update(&mut d, &json!({"$inc": {"count": 2}})).unwrap();
        assert_eq!(d.get("count").unwrap(), &json!(7));
        assert!(d.get("count").unwrap().is_i64());
    }

    #[test]
    fn test_inc_float() {
        let mut d = doc(json!({"_id": 1, "score": 1.5}));
        apply_update(&mut d, &json!({"$inc": {"score": 0.5}})).unwrap();
        assert_eq!(d.get("score").unwrap(), &json!(2.0));
    }

    #[test]
    fn test_inc_missing_field_starts_from_zero() {
        let mut d = doc(json!({"_id": 1}));
        apply_update(&mut d, &json!({"$inc": {"visits": 3}})).unwrap();
        assert_eq!(d.get("visits").unwrap(), &json!(3));
    }

    #[test]
    fn test_inc_non_numeric_is_error() {
        let mut d = doc(json!({"_id": 1, "name": "Alice"}));
        let result = apply_update(&mut d, &json!({"$inc": {"name": 1}}));
        assert!(matches!(result, Err(FlowBaseError::InvalidUpdate(_))));
    }

    #[test]
    fn test_unset() {
        let mut d = doc(json!({"_id": 1, "temp": true}));
        let modified = apply_update(&mut d, &json!({"$unset": {"temp": ""}})).unwrap();
        assert!(modified);
        assert!(d.get("temp").is_none());

        // Unsetting a missing field is a no-op
        let modified = apply_update(&mut d, &json!({"$unset": {"temp": ""}})).unwrap();
        assert!(!modified);
    }

    #[test]
    fn test_push_creates_and_appends() {
        let mut d = doc(json!({"_id": 1}));
        apply_update(&mut d, &json!({"$push": {"tags": "rust"}})).unwrap();
        apply_update(&mut d, &json!({"$push": {"tags": "db"}})).unwrap();
        assert_eq!(d.get("tags").unwrap(), &json!(["rust", "db"]));
    }

    #[test]
    fn test_push_non_array_is_error() {
        let mut d = doc(json!({"_id": 1, "tags": "oops"}));
        let result = apply_update(&mut d, &json!({"$push": {"tags": "rust"}}));
        assert!(matches!(result, Err(FlowBaseError::InvalidUpdate(_))));
    }

    #[test]
    fn test_pull_removes_matching() {
        let mut d = doc(json!({"_id": 1, "tags": ["a", "b", "a"]}));
        let modified = apply_update(&mut d, &json!({"$pull": {"tags": "a"}})).unwrap();
        assert!(modified);
        assert_eq!(d.get("tags").unwrap(), &json!(["b"]));
    }

    #[test]
    fn test_multiple_operators_apply_together() {
        let mut d = doc(json!({"_id": 1, "a": 0, "b": 1}));
        let update = json!({"$set": {"a": 1}, "$inc": {"b": 1}});
        apply_update(&mut d, &update).unwrap();
        assert_eq!(d.get("a").unwrap(), &json!(1));
        assert_eq!(d.get("b").unwrap(), &json!(2));
    }

    #[test]
    fn test_bare_replacement_rejected() {
        let mut d = doc(json!({"_id": 1}));
        let result = apply_update(&mut d, &json!({"name": "Bob"}));
        assert!(matches!(result, Err(FlowBaseError::InvalidUpdate(_))));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let mut d = doc(json!({"_id": 1}));
        let result = apply_update(&mut d, &json!({"$rename": {"a": "b"}}));
        assert!(matches!(result, Err(FlowBaseError::InvalidUpdate(_))));
    }
}
