// flowbase-core/src/document.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A stored document: `_id` plus arbitrary JSON fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

/// Document ID variants.
/// Untagged so ids appear as plain values in documents: {"_id": 2}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
    ObjectId(String),
}

impl DocumentId {
    /// Next auto-increment ID
    pub fn new_auto(last_id: u64) -> Self {
        DocumentId::Int((last_id + 1) as i64)
    }

    /// Fresh ObjectId (UUID v4 string form)
    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().to_string())
    }

    pub fn as_string(&self) -> String {
        match self {
            DocumentId::Int(i) => i.to_string(),
            DocumentId::String(s) => s.clone(),
            DocumentId::ObjectId(oid) => oid.clone(),
        }
    }
}

impl Document {
    pub fn new(id: DocumentId, fields: HashMap<String, Value>) -> Self {
        Document { id, fields }
    }

    /// Build a Document directly from a serde_json::Value.
    ///
    /// serde's `rename = "_id"` + `flatten` consumes `_id` during
    /// deserialization, so it is re-inserted into `fields` afterwards:
    /// query matching expects `_id` to be reachable like any other field.
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        let mut doc: Self = serde_json::from_value(value.clone())?;
        doc.fields
            .insert("_id".to_string(), serde_json::to_value(&doc.id)?);
        Ok(doc)
    }

    /// Field lookup with dot-notation support (includes `_id`).
    /// "address.city" walks into nested objects; numeric segments index arrays.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field.is_empty() {
            return None;
        }
        if field.contains('.') {
            let mut value = self.fields.get(field.split('.').next()?)?;
            for part in field.split('.').skip(1) {
                match value {
                    Value::Object(map) => {
                        value = map.get(part)?;
                    }
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
        } else {
            self.fields.get(field)
        }
    }

    /// Set a top-level field
    pub fn set(&mut self, field: String, value: Value) {
        self.fields.insert(field, value);
    }

    /// Remove a top-level field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Clone into a plain JSON object (fields already include `_id`).
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        if !map.contains_key("_id") {
            if let Ok(id) = serde_json::to_value(&self.id) {
                map.insert("_id".to_string(), id);
            }
        }
        Value::Object(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_id_new_auto() {
        assert_eq!(DocumentId::new_auto(0), DocumentId::Int(1));
        assert_eq!(DocumentId::new_auto(10), DocumentId::Int(11));
    }

    #[test]
    fn test_document_id_object_id() {
        let id = DocumentId::new_object_id();
        match id {
            DocumentId::ObjectId(s) => {
                assert_eq!(s.len(), 36); // UUID with dashes
                assert!(s.contains('-'));
            }
            _ => panic!("Expected ObjectId variant"),
        }
    }

    #[test]
    fn test_document_from_value_id_in_fields() {
        let doc = Document::from_value(&json!({"_id": 1, "name": "Alice"})).unwrap();
        assert_eq!(doc.id, DocumentId::Int(1));
        // from_value re-inserts _id so filters can match on it
        assert_eq!(doc.get("_id").unwrap(), &json!(1));
        assert_eq!(doc.get("name").unwrap(), &json!("Alice"));
    }

    #[test]
    fn test_document_from_value_string_id() {
        let doc = Document::from_value(&json!({"_id": "abc123", "type": "test"})).unwrap();
        assert_eq!(doc.id, DocumentId::String("abc123".to_string()));
    }

    #[test]
    fn test_document_get_nested_dot_path() {
        let doc = Document::from_value(&json!({
            "_id": 1,
            "address": {"city": "Budapest", "zip": 1111},
            "tags": ["rust", "db"]
        }))
        .unwrap();
        assert_eq!(doc.get("address.city").unwrap(), &json!("Budapest"));
        assert_eq!(doc.get("tags.0").unwrap(), &json!("rust"));
        assert!(doc.get("address.country").is_none());
    }

    #[test]
    fn test_document_set_and_remove() {
        let mut doc = Document::new(DocumentId::Int(1), HashMap::new());
        doc.set("count".to_string(), json!(1));
        doc.set("count".to_string(), json!(2));
        assert_eq!(doc.get("count").unwrap(), &json!(2));

        let removed = doc.remove("count");
        assert_eq!(removed, Some(json!(2)));
        assert!(doc.get("count").is_none());
    }

    #[test]
    fn test_document_to_value_roundtrip() {
        let original = Document::from_value(&json!({
            "_id": 99,
            "name": "Grace",
            "meta": {"version": 1}
        }))
        .unwrap();

        let value = original.to_value();
        assert_eq!(value["_id"], json!(99));
        assert_eq!(value["name"], json!("Grace"));

        let restored = Document::from_value(&value).unwrap();
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.get("meta"), original.get("meta"));
    }
}
