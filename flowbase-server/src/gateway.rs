//! Store Gateway - the one owner of the backing document store
//!
//! Explicitly constructed by the process entry point and shared by
//! reference, replacing any notion of a process-global connection cache.
//! All operations run against a single configured collection; the name is
//! fixed by configuration and never user-supplied.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use flowbase_core::{Collection, CollectionStats, Database, DocumentId, InsertManyResult};

use crate::error::Result;

/// Gateway over one database + one logical collection
pub struct StoreGateway {
    db: Database,
    collection_name: String,
}

impl StoreGateway {
    /// "Connect": open the database once; the handle is reused for the
    /// process lifetime.
    pub fn connect(database_name: &str, collection_name: &str) -> Self {
        info!(database = database_name, collection = collection_name, "store gateway connected");
        StoreGateway {
            db: Database::new(database_name),
            collection_name: collection_name.to_string(),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn coll(&self) -> Arc<Collection> {
        self.db.collection(&self.collection_name)
    }

    /// Insert one document. Documents without an `_id` get a server-assigned
    /// ObjectId, mirroring what a production driver would do.
    pub fn insert_one(&self, mut fields: HashMap<String, Value>) -> Result<DocumentId> {
        if !fields.contains_key("_id") {
            let id = DocumentId::new_object_id();
            fields.insert("_id".to_string(), Value::String(id.as_string()));
        }
        Ok(self.coll().insert_one(fields)?)
    }

    pub fn insert_many(&self, documents: Vec<HashMap<String, Value>>) -> Result<InsertManyResult> {
        let documents = documents
            .into_iter()
            .map(|mut fields| {
                if !fields.contains_key("_id") {
                    let id = DocumentId::new_object_id();
                    fields.insert("_id".to_string(), Value::String(id.as_string()));
                }
                fields
            })
            .collect();
        Ok(self.coll().insert_many(documents)?)
    }

    pub fn find_by_id(&self, id: &DocumentId) -> Result<Option<Value>> {
        let filter = serde_json::json!({ "_id": Value::String(id.as_string()) });
        let mut results = self.coll().find_with_limit(&filter, 1)?;
        Ok(results.pop())
    }

    pub fn find(&self, filter: &Value, limit: usize) -> Result<Vec<Value>> {
        Ok(self.coll().find_with_limit(filter, limit)?)
    }

    pub fn explain(&self, filter: &Value) -> Result<Value> {
        Ok(self.coll().explain(filter)?)
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<(u64, u64)> {
        Ok(self.coll().update_many(filter, update)?)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<u64> {
        Ok(self.coll().delete_many(filter)?)
    }

    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        Ok(self.coll().aggregate(pipeline)?)
    }

    pub fn create_index(&self, field: &str, unique: bool) -> Result<String> {
        Ok(self.coll().create_index(field, unique)?)
    }

    /// Collection statistics. Querying a collection that has never been
    /// created is NOT an error: it reports zero-valued stats instead.
    pub fn stats(&self) -> CollectionStats {
        if !self.db.has_collection(&self.collection_name) {
            return CollectionStats::empty();
        }
        self.coll().stats()
    }

    /// Delete every document (demo reset). Destructive and irreversible.
    pub fn reset(&self) -> Result<u64> {
        let deleted = self.coll().delete_many(&serde_json::json!({}))?;
        info!(deleted, "collection reset");
        Ok(deleted)
    }
}
