// flowbase-core/src/collection.rs
//
// In-memory collection: CRUD, aggregation, indexing, explain and stats.
// Locking discipline: `state` before `indexes`, writers validate the whole
// batch before mutating anything.

use std::collections::HashMap;
use std::ops::Bound;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::aggregation::Pipeline;
use crate::document::{Document, DocumentId};
use crate::error::{FlowBaseError, Result};
use crate::index::{IndexKey, IndexManager};
use crate::query::matches_filter;
use crate::update::apply_update;

/// Result of insert_many
#[derive(Debug, Clone)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub inserted_count: usize,
}

/// Scan accounting for one executed query, used by explain and metrics
#[derive(Debug, Clone, Default)]
struct QueryExecution {
    pub docs_examined: u64,
    pub keys_examined: u64,
    pub index_used: Option<String>,
}

/// Collection statistics in the wire shape the stats endpoint reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub document_count: u64,
    pub storage_size: u64,
    pub avg_obj_size: u64,
    pub index_count: u64,
    pub indexes: Vec<IndexStats>,
    pub total_index_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub key: Value,
    pub unique: bool,
}

impl CollectionStats {
    /// Zero-valued stats for a collection that does not exist yet
    pub fn empty() -> Self {
        CollectionStats {
            document_count: 0,
            storage_size: 0,
            avg_obj_size: 0,
            index_count: 0,
            indexes: Vec::new(),
            total_index_size: 0,
        }
    }
}

#[derive(Debug, Default)]
struct CollectionState {
    docs: Vec<Document>,
    last_id: u64,
}

/// One named collection of documents
pub struct Collection {
    pub name: String,
    state: RwLock<CollectionState>,
    indexes: RwLock<IndexManager>,
}

enum IndexLookup {
    Exact(IndexKey),
    Range(Bound<IndexKey>, Bound<IndexKey>),
}

impl Collection {
    pub fn new(name: String) -> Self {
        Collection {
            name,
            state: RwLock::new(CollectionState::default()),
            indexes: RwLock::new(IndexManager::new()),
        }
    }

    // ========== WRITE OPERATIONS ==========

    /// Insert one document. `_id` is honored when present, auto-assigned
    /// (incrementing integer) otherwise.
    pub fn insert_one(&self, fields: HashMap<String, Value>) -> Result<DocumentId> {
        let mut state = self.state.write();
        let mut indexes = self.indexes.write();
        let doc_id = Self::prepare_insert(&mut state, &mut indexes, fields)?;
        debug!(collection = %self.name, id = %doc_id.as_string(), "insert_one");
        Ok(doc_id)
    }

    /// Insert a batch of documents. The insert is ordered: on a failure
    /// (duplicate id, unique index violation) earlier documents stay.
    pub fn insert_many(&self, documents: Vec<HashMap<String, Value>>) -> Result<InsertManyResult> {
        if documents.is_empty() {
            return Ok(InsertManyResult {
                inserted_ids: Vec::new(),
                inserted_count: 0,
            });
        }

        let mut state = self.state.write();
        let mut indexes = self.indexes.write();

        let mut inserted_ids = Vec::with_capacity(documents.len());
        for fields in documents {
            inserted_ids.push(Self::prepare_insert(&mut state, &mut indexes, fields)?);
        }

        debug!(collection = %self.name, count = inserted_ids.len(), "insert_many");
        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    fn prepare_insert(
        state: &mut CollectionState,
        indexes: &mut IndexManager,
        mut fields: HashMap<String, Value>,
    ) -> Result<DocumentId> {
        let doc_id = match fields.get("_id") {
            Some(existing_id) => {
                let id: DocumentId = serde_json::from_value(existing_id.clone())
                    .map_err(|e| FlowBaseError::Serialization(format!("Invalid _id format: {}", e)))?;
                if state.docs.iter().any(|d| d.id == id) {
                    return Err(FlowBaseError::InvalidQuery(format!(
                        "Duplicate _id: {}",
                        id.as_string()
                    )));
                }
                // Keep auto-increment ahead of explicit integer ids
                if let DocumentId::Int(i) = id {
                    if i > 0 && i as u64 > state.last_id {
                        state.last_id = i as u64;
                    }
                }
                id
            }
            None => {
                let id = DocumentId::new_auto(state.last_id);
                state.last_id += 1;
                fields.insert("_id".to_string(), serde_json::to_value(&id)?);
                id
            }
        };

        let doc = Document::new(doc_id.clone(), fields);

        // Indexes first so a unique violation leaves the collection untouched
        indexes.insert_document(&doc)?;
        state.docs.push(doc);

        Ok(doc_id)
    }

    /// Apply update operators to every matching document.
    /// Returns (matched_count, modified_count).
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<(u64, u64)> {
        let mut state = self.state.write();
        let mut indexes = self.indexes.write();

        // Match pass first: a malformed filter must not partially update
        let mut match_flags = Vec::with_capacity(state.docs.len());
        for doc in &state.docs {
            match_flags.push(matches_filter(doc, filter)?);
        }

        let mut matched = 0u64;
        let mut modified = 0u64;
        for (doc, is_match) in state.docs.iter_mut().zip(match_flags) {
            if !is_match {
                continue;
            }
            matched += 1;

            let mut updated = doc.clone();
            if apply_update(&mut updated, update)? {
                indexes.remove_document(doc);
                if let Err(err) = indexes.insert_document(&updated) {
                    // Restore the old entries before surfacing the violation
                    indexes.insert_document(doc)?;
                    return Err(err);
                }
                *doc = updated;
                modified += 1;
            }
        }

        debug!(collection = %self.name, matched, modified, "update_many");
        Ok((matched, modified))
    }

    /// Delete every matching document. An empty filter deletes everything.
    pub fn delete_many(&self, filter: &Value) -> Result<u64> {
        let mut state = self.state.write();
        let mut indexes = self.indexes.write();

        let mut match_flags = Vec::with_capacity(state.docs.len());
        for doc in &state.docs {
            match_flags.push(matches_filter(doc, filter)?);
        }

        let old_docs = std::mem::take(&mut state.docs);
        let mut deleted = 0u64;
        for (doc, is_match) in old_docs.into_iter().zip(match_flags) {
            if is_match {
                indexes.remove_document(&doc);
                deleted += 1;
            } else {
                state.docs.push(doc);
            }
        }

        debug!(collection = %self.name, deleted, "delete_many");
        Ok(deleted)
    }

    // ========== QUERY OPERATIONS ==========

    /// Find documents matching a filter
    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        Ok(self.execute_find(filter, None)?.0)
    }

    /// Find with a result-count cap
    pub fn find_with_limit(&self, filter: &Value, limit: usize) -> Result<Vec<Value>> {
        Ok(self.execute_find(filter, Some(limit))?.0)
    }

    /// Count documents matching a filter
    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        Ok(self.execute_find(filter, None)?.0.len() as u64)
    }

    /// Report how a find would execute: winning plan plus execution stats.
    /// The query actually runs so the examined/returned counters are real.
    pub fn explain(&self, filter: &Value) -> Result<Value> {
        let started = Instant::now();
        let (results, execution) = self.execute_find(filter, None)?;
        let millis = started.elapsed().as_millis() as u64;

        let winning_plan = match &execution.index_used {
            Some(index_name) => json!({
                "stage": "FETCH",
                "inputStage": {
                    "stage": "IXSCAN",
                    "indexName": index_name,
                    "direction": "forward",
                }
            }),
            None => json!({
                "stage": "COLLSCAN",
                "filter": filter,
            }),
        };

        Ok(json!({
            "queryPlanner": { "winningPlan": winning_plan },
            "executionStats": {
                "executionTimeMillis": millis,
                "totalDocsExamined": execution.docs_examined,
                "totalKeysExamined": execution.keys_examined,
                "nReturned": results.len(),
            }
        }))
    }

    fn execute_find(
        &self,
        filter: &Value,
        limit: Option<usize>,
    ) -> Result<(Vec<Value>, QueryExecution)> {
        if !filter.is_object() {
            return Err(FlowBaseError::InvalidQuery(
                "Query filter must be an object".to_string(),
            ));
        }

        let state = self.state.read();
        let indexes = self.indexes.read();
        let mut execution = QueryExecution::default();

        let mut results = Vec::new();
        match Self::select_index(filter, &indexes) {
            Some((index_name, candidate_ids, keys_examined)) => {
                execution.index_used = Some(index_name);
                execution.keys_examined = keys_examined;

                let by_id: AHashMap<&DocumentId, &Document> =
                    state.docs.iter().map(|d| (&d.id, d)).collect();

                for doc_id in &candidate_ids {
                    let doc = match by_id.get(doc_id) {
                        Some(doc) => *doc,
                        None => continue,
                    };
                    execution.docs_examined += 1;
                    if matches_filter(doc, filter)? {
                        results.push(doc.to_value());
                    }
                }
            }
            None => {
                for doc in &state.docs {
                    execution.docs_examined += 1;
                    if matches_filter(doc, filter)? {
                        results.push(doc.to_value());
                    }
                }
            }
        }

        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok((results, execution))
    }

    /// Pick a usable index for the filter: the first top-level field with an
    /// index and an equality or pure-range condition. Anything else scans.
    fn select_index(
        filter: &Value,
        indexes: &IndexManager,
    ) -> Option<(String, Vec<DocumentId>, u64)> {
        let obj = filter.as_object()?;

        for (field, condition) in obj {
            if field.starts_with('$') {
                continue;
            }
            let index = match indexes.index_for_field(field) {
                Some(index) => index,
                None => continue,
            };
            let lookup = match Self::condition_lookup(condition) {
                Some(lookup) => lookup,
                None => continue,
            };
            return match lookup {
                IndexLookup::Exact(key) => {
                    let ids = index.get(&key).cloned().unwrap_or_default();
                    let keys = ids.len() as u64;
                    Some((index.metadata.name.clone(), ids, keys))
                }
                IndexLookup::Range(lower, upper) => {
                    let (ids, keys) = index.range(lower, upper);
                    Some((index.metadata.name.clone(), ids, keys))
                }
            };
        }
        None
    }

    /// Translate a field condition into an index lookup, or None when the
    /// condition cannot be answered from an index.
    fn condition_lookup(condition: &Value) -> Option<IndexLookup> {
        match condition {
            Value::Object(ops) => {
                if ops.is_empty() || !ops.keys().all(|k| k.starts_with('$')) {
                    return None;
                }
                if let Some(eq) = ops.get("$eq") {
                    if ops.len() == 1 {
                        return IndexKey::from_value(eq).map(IndexLookup::Exact);
                    }
                    return None;
                }

                let mut lower = Bound::Unbounded;
                let mut upper = Bound::Unbounded;
                for (op, target) in ops {
                    let key = IndexKey::from_value(target)?;
                    match op.as_str() {
                        "$gt" => lower = Bound::Excluded(key),
                        "$gte" => lower = Bound::Included(key),
                        "$lt" => upper = Bound::Excluded(key),
                        "$lte" => upper = Bound::Included(key),
                        _ => return None,
                    }
                }
                Some(IndexLookup::Range(lower, upper))
            }
            Value::Array(_) => None,
            literal => IndexKey::from_value(literal).map(IndexLookup::Exact),
        }
    }

    // ========== AGGREGATION ==========

    /// Execute an aggregation pipeline over the whole collection
    pub fn aggregate(&self, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline_json)?;
        let docs: Vec<Value> = {
            let state = self.state.read();
            state.docs.iter().map(Document::to_value).collect()
        };
        pipeline.execute(docs)
    }

    // ========== INDEX OPERATIONS ==========

    /// Create a single-field index, backfilled from existing documents
    pub fn create_index(&self, field: &str, unique: bool) -> Result<String> {
        if field.is_empty() || field.starts_with('$') {
            return Err(FlowBaseError::IndexError(format!(
                "Invalid index field: '{}'",
                field
            )));
        }

        let state = self.state.read();
        let mut indexes = self.indexes.write();
        let name = indexes.create_index_over(&self.name, field, unique, state.docs.iter())?;
        debug!(collection = %self.name, index = %name, "create_index");
        Ok(name)
    }

    // ========== STATS ==========

    /// Collection statistics: counts, serialized-size estimates, indexes
    pub fn stats(&self) -> CollectionStats {
        let state = self.state.read();
        let indexes = self.indexes.read();

        let document_count = state.docs.len() as u64;
        let storage_size: u64 = state
            .docs
            .iter()
            .map(|doc| {
                serde_json::to_string(doc)
                    .map(|s| s.len() as u64)
                    .unwrap_or(0)
            })
            .sum();
        let avg_obj_size = if document_count == 0 {
            0
        } else {
            storage_size / document_count
        };

        let index_stats: Vec<IndexStats> = indexes
            .list()
            .into_iter()
            .map(|meta| IndexStats {
                name: meta.name,
                key: json!({ meta.field: 1 }),
                unique: meta.unique,
            })
            .collect();

        CollectionStats {
            document_count,
            storage_size,
            avg_obj_size,
            index_count: index_stats.len() as u64,
            indexes: index_stats,
            total_index_size: indexes.total_size_estimate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> HashMap<String, Value> {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn seeded() -> Collection {
        let coll = Collection::new("people".to_string());
        coll.insert_one(fields(json!({"name": "Alice", "age": 30, "dept": "eng"})))
            .unwrap();
        coll.insert_one(fields(json!({"name": "Bob", "age": 22, "dept": "eng"})))
            .unwrap();
        coll.insert_one(fields(json!({"name": "Carol", "age": 40, "dept": "sales"})))
            .unwrap();
        coll
    }

    #[test]
    fn test_insert_assigns_incrementing_ids() {
        let coll = Collection::new("t".to_string());
        let id1 = coll.insert_one(fields(json!({"a": 1}))).unwrap();
        let id2 = coll.insert_one(fields(json!({"a": 2}))).unwrap();
        assert_eq!(id1, DocumentId::Int(1));
        assert_eq!(id2, DocumentId::Int(2));
    }

    #[test]
    fn test_insert_honors_explicit_id() {
        let coll = Collection::new("t".to_string());
        let id = coll
            .insert_one(fields(json!({"_id": "custom", "a": 1})))
            .unwrap();
        assert_eq!(id, DocumentId::String("custom".to_string()));

        let found = coll.find(&json!({"_id": "custom"})).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_insert_duplicate_id_rejected() {
        let coll = Collection::new("t".to_string());
        coll.insert_one(fields(json!({"_id": 7}))).unwrap();
        let result = coll.insert_one(fields(json!({"_id": 7})));
        assert!(result.is_err());
    }

    #[test]
    fn test_auto_id_skips_past_explicit_int_id() {
        let coll = Collection::new("t".to_string());
        coll.insert_one(fields(json!({"_id": 5}))).unwrap();
        let id = coll.insert_one(fields(json!({"a": 1}))).unwrap();
        assert_eq!(id, DocumentId::Int(6));
    }

    #[test]
    fn test_find_round_trip() {
        let coll = seeded();
        let all = coll.find(&json!({})).unwrap();
        assert_eq!(all.len(), 3);

        let eng = coll.find(&json!({"dept": "eng"})).unwrap();
        assert_eq!(eng.len(), 2);
        assert!(eng.iter().all(|d| d["dept"] == json!("eng")));
    }

    #[test]
    fn test_find_with_limit() {
        let coll = seeded();
        let limited = coll.find_with_limit(&json!({}), 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_update_many_counts() {
        let coll = seeded();
        let (matched, modified) = coll
            .update_many(&json!({"dept": "eng"}), &json!({"$set": {"remote": true}}))
            .unwrap();
        assert_eq!(matched, 2);
        assert_eq!(modified, 2);

        // Same update again matches but modifies nothing
        let (matched, modified) = coll
            .update_many(&json!({"dept": "eng"}), &json!({"$set": {"remote": true}}))
            .unwrap();
        assert_eq!(matched, 2);
        assert_eq!(modified, 0);
    }

    #[test]
    fn test_update_preserves_other_operators() {
        let coll = seeded();
        coll.update_many(
            &json!({"name": "Alice"}),
            &json!({"$set": {"a": 1}, "$inc": {"age": 1}}),
        )
        .unwrap();
        let alice = &coll.find(&json!({"name": "Alice"})).unwrap()[0];
        assert_eq!(alice["a"], json!(1));
        assert_eq!(alice["age"], json!(31));
    }

    #[test]
    fn test_delete_many_empty_filter_deletes_all() {
        let coll = seeded();
        let deleted = coll.delete_many(&json!({})).unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(coll.find(&json!({})).unwrap().len(), 0);
    }

    #[test]
    fn test_delete_many_selective() {
        let coll = seeded();
        let deleted = coll.delete_many(&json!({"dept": "eng"})).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(coll.count_documents(&json!({})).unwrap(), 1);
    }

    #[test]
    fn test_malformed_filter_does_not_partially_delete() {
        let coll = seeded();
        let result = coll.delete_many(&json!({"age": {"$bogus": 1}}));
        assert!(result.is_err());
        assert_eq!(coll.count_documents(&json!({})).unwrap(), 3);
    }

    #[test]
    fn test_explain_collscan_without_index() {
        let coll = seeded();
        let plan = coll.explain(&json!({"age": {"$gte": 25}})).unwrap();
        assert_eq!(plan["queryPlanner"]["winningPlan"]["stage"], json!("COLLSCAN"));
        assert_eq!(plan["executionStats"]["totalDocsExamined"], json!(3));
        assert_eq!(plan["executionStats"]["nReturned"], json!(2));
    }

    #[test]
    fn test_explain_ixscan_with_index() {
        let coll = seeded();
        coll.create_index("age", false).unwrap();
        let plan = coll.explain(&json!({"age": {"$gte": 25}})).unwrap();
        assert_eq!(plan["queryPlanner"]["winningPlan"]["stage"], json!("FETCH"));
        assert_eq!(
            plan["queryPlanner"]["winningPlan"]["inputStage"]["indexName"],
            json!("people_age")
        );
        // Only the two docs in range are fetched
        assert_eq!(plan["executionStats"]["totalDocsExamined"], json!(2));
    }

    #[test]
    fn test_index_equality_lookup_used() {
        let coll = seeded();
        coll.create_index("dept", false).unwrap();
        let plan = coll.explain(&json!({"dept": "eng"})).unwrap();
        assert_eq!(
            plan["queryPlanner"]["winningPlan"]["inputStage"]["stage"],
            json!("IXSCAN")
        );
        assert_eq!(plan["executionStats"]["nReturned"], json!(2));
    }

    #[test]
    fn test_index_maintained_across_update_and_delete() {
        let coll = seeded();
        coll.create_index("age", false).unwrap();

        coll.update_many(&json!({"name": "Bob"}), &json!({"$set": {"age": 50}}))
            .unwrap();
        let over_45 = coll.find(&json!({"age": {"$gt": 45}})).unwrap();
        assert_eq!(over_45.len(), 1);
        assert_eq!(over_45[0]["name"], json!("Bob"));

        coll.delete_many(&json!({"name": "Bob"})).unwrap();
        assert_eq!(coll.find(&json!({"age": {"$gt": 45}})).unwrap().len(), 0);
    }

    #[test]
    fn test_unique_index_rejects_duplicate_insert() {
        let coll = Collection::new("t".to_string());
        coll.create_index("email", true).unwrap();
        coll.insert_one(fields(json!({"email": "a@b.com"}))).unwrap();
        let result = coll.insert_one(fields(json!({"email": "a@b.com"})));
        assert!(result.is_err());
        // Failed insert left nothing behind
        assert_eq!(coll.count_documents(&json!({})).unwrap(), 1);
    }

    #[test]
    fn test_create_index_backfills_existing_docs() {
        let coll = seeded();
        coll.create_index("age", false).unwrap();
        let plan = coll.explain(&json!({"age": 30})).unwrap();
        assert_eq!(plan["executionStats"]["nReturned"], json!(1));
    }

    #[test]
    fn test_aggregate_match_group() {
        let coll = seeded();
        let results = coll
            .aggregate(&json!([
                {"$match": {"age": {"$gte": 25}}},
                {"$group": {"_id": "$dept", "count": {"$sum": 1}}}
            ]))
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_stats_counts_and_indexes() {
        let coll = seeded();
        coll.create_index("age", false).unwrap();
        let stats = coll.stats();
        assert_eq!(stats.document_count, 3);
        assert!(stats.storage_size > 0);
        assert!(stats.avg_obj_size > 0);
        assert_eq!(stats.index_count, 1);
        assert_eq!(stats.indexes[0].name, "people_age");
        assert_eq!(stats.indexes[0].key, json!({"age": 1}));
    }

    #[test]
    fn test_stats_empty_collection() {
        let coll = Collection::new("empty".to_string());
        let stats = coll.stats();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.avg_obj_size, 0);
    }
}
