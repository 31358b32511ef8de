// flowbase-core/src/database.rs

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use crate::collection::Collection;

/// A named set of collections, created on first use.
///
/// The registry is a concurrent map so callers can share one `Database`
/// across threads without an outer lock; each collection serializes its
/// own mutations internally.
pub struct Database {
    name: String,
    collections: DashMap<String, Arc<Collection>>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(database = %name, "database opened");
        Database {
            name,
            collections: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a collection handle, creating the collection if needed
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name.to_string())))
            .clone()
    }

    /// Whether a collection has ever been created
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn drop_collection(&self, name: &str) -> bool {
        self.collections.remove(name).is_some()
    }

    /// Database-level statistics
    pub fn stats(&self) -> Value {
        let collections = self.list_collections();
        serde_json::json!({
            "database": self.name,
            "collections": collections,
            "collectionCount": collections.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_collection_created_on_first_use() {
        let db = Database::new("demo");
        assert!(!db.has_collection("users"));

        db.collection("users");
        assert!(db.has_collection("users"));
        assert_eq!(db.list_collections(), vec!["users".to_string()]);
    }

    #[test]
    fn test_collection_handle_shares_state() {
        let db = Database::new("demo");
        let first = db.collection("users");
        first
            .insert_one(HashMap::from([("name".to_string(), json!("Alice"))]))
            .unwrap();

        let second = db.collection("users");
        assert_eq!(second.count_documents(&json!({})).unwrap(), 1);
    }

    #[test]
    fn test_drop_collection() {
        let db = Database::new("demo");
        db.collection("temp");
        assert!(db.drop_collection("temp"));
        assert!(!db.has_collection("temp"));
        assert!(!db.drop_collection("temp"));
    }

    #[test]
    fn test_stats_shape() {
        let db = Database::new("demo");
        db.collection("users");
        let stats = db.stats();
        assert_eq!(stats["database"], json!("demo"));
        assert_eq!(stats["collectionCount"], json!(1));
    }
}
