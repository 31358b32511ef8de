// flowbase-core/src/index.rs
//! Single-field indexes over document collections
//!
//! Each index maps an ordered scalar key to the document ids carrying that
//! value, backed by a `BTreeMap` so both equality and range lookups are
//! cheap. Indexes are named `{collection}_{field}` and maintained on every
//! insert, update and delete.

use crate::document::{Document, DocumentId};
use crate::error::{FlowBaseError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

/// f64 wrapper with a total ordering so it can live in a BTreeMap key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedFloat(pub f64);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Indexable scalar key. All numbers are widened to f64 so that
/// `{"age": 25}` and `{"age": 25.0}` land on the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Number(OrderedFloat),
    String(String),
}

impl IndexKey {
    /// Key for a field value; arrays and objects are not indexable.
    pub fn from_value(value: &Value) -> Option<IndexKey> {
        match value {
            Value::Null => Some(IndexKey::Null),
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => n.as_f64().map(|f| IndexKey::Number(OrderedFloat(f))),
            Value::String(s) => Some(IndexKey::String(s.clone())),
            _ => None,
        }
    }
}

/// Index metadata surfaced by stats and list_indexes
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub name: String,
    pub field: String,
    pub unique: bool,
}

/// One single-field index
#[derive(Debug)]
pub struct FieldIndex {
    pub metadata: IndexMeta,
    map: BTreeMap<IndexKey, Vec<DocumentId>>,
}

impl FieldIndex {
    pub fn new(name: String, field: String, unique: bool) -> Self {
        FieldIndex {
            metadata: IndexMeta {
                name,
                field,
                unique,
            },
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: IndexKey, doc_id: DocumentId) -> Result<()> {
        let entry = self.map.entry(key).or_default();
        if self.metadata.unique && !entry.is_empty() {
            return Err(FlowBaseError::IndexError(format!(
                "Duplicate key violates unique index '{}'",
                self.metadata.name
            )));
        }
        entry.push(doc_id);
        Ok(())
    }

    pub fn remove(&mut self, key: &IndexKey, doc_id: &DocumentId) {
        if let Some(entry) = self.map.get_mut(key) {
            entry.retain(|id| id != doc_id);
            if entry.is_empty() {
                self.map.remove(key);
            }
        }
    }

    /// Equality lookup: document ids carrying exactly this key
    pub fn get(&self, key: &IndexKey) -> Option<&Vec<DocumentId>> {
        self.map.get(key)
    }

    /// Range lookup. Returns (doc ids, keys visited).
    pub fn range(
        &self,
        lower: Bound<IndexKey>,
        upper: Bound<IndexKey>,
    ) -> (Vec<DocumentId>, u64) {
        let mut ids = Vec::new();
        let mut keys_visited = 0u64;
        for (_, entry) in self.map.range((lower, upper)) {
            keys_visited += 1;
            ids.extend(entry.iter().cloned());
        }
        (ids, keys_visited)
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.map.len()
    }

    /// Rough byte estimate for stats reporting
    pub fn size_estimate(&self) -> u64 {
        self.map
            .iter()
            .map(|(key, ids)| {
                let key_size = match key {
                    IndexKey::Null => 1,
                    IndexKey::Bool(_) => 1,
                    IndexKey::Number(_) => 8,
                    IndexKey::String(s) => s.len() as u64,
                };
                key_size + ids.len() as u64 * 8
            })
            .sum()
    }
}

/// All indexes of one collection
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: Vec<FieldIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager {
            indexes: Vec::new(),
        }
    }

    /// Create an empty index named `{collection}_{field}`.
    pub fn create_index(
        &mut self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> Result<String> {
        self.create_index_over(collection, field, unique, std::iter::empty())
    }

    /// Create an index and backfill it from existing documents. A unique
    /// violation during backfill leaves the manager unchanged.
    pub fn create_index_over<'a, I>(
        &mut self,
        collection: &str,
        field: &str,
        unique: bool,
        docs: I,
    ) -> Result<String>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let name = format!("{}_{}", collection, field);
        if self.indexes.iter().any(|idx| idx.metadata.name == name) {
            return Err(FlowBaseError::IndexError(format!(
                "Index '{}' already exists",
                name
            )));
        }

        let mut index = FieldIndex::new(name.clone(), field.to_string(), unique);
        for doc in docs {
            if let Some(key) = doc.get(field).and_then(IndexKey::from_value) {
                index.insert(key, doc.id.clone())?;
            }
        }

        self.indexes.push(index);
        Ok(name)
    }

    pub fn index_for_field(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.iter().find(|idx| idx.metadata.field == field)
    }

    pub fn list(&self) -> Vec<IndexMeta> {
        self.indexes.iter().map(|idx| idx.metadata.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn total_size_estimate(&self) -> u64 {
        self.indexes.iter().map(FieldIndex::size_estimate).sum()
    }

    /// Index a newly inserted document. Unique constraints are checked
    /// up front so a violation leaves every index untouched.
    pub fn insert_document(&mut self, doc: &Document) -> Result<()> {
        for idx in &self.indexes {
            if !idx.metadata.unique {
                continue;
            }
            if let Some(key) = doc.get(&idx.metadata.field).and_then(IndexKey::from_value) {
                if idx.get(&key).is_some() {
                    return Err(FlowBaseError::IndexError(format!(
                        "Duplicate key violates unique index '{}'",
                        idx.metadata.name
                    )));
                }
            }
        }
        for idx in &mut self.indexes {
            if let Some(key) = doc.get(&idx.metadata.field).and_then(IndexKey::from_value) {
                idx.insert(key, doc.id.clone())?;
            }
        }
        Ok(())
    }

    /// Drop a document's entries from every index.
    pub fn remove_document(&mut self, doc: &Document) {
        for idx in &mut self.indexes {
            if let Some(key) = doc.get(&idx.metadata.field).and_then(IndexKey::from_value) {
                idx.remove(&key, &doc.id);
            }
        }
    }
}
