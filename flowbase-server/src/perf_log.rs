//! Performance Log - capped ring of the most recent executed operations
//!
//! Newest first, at most 50 entries, prepend + truncate under a single
//! Mutex so concurrent completions keep their ordering. Only attempts
//! that reached the store are recorded; pre-store validation failures
//! carry no execution metrics and are skipped by the executor.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Maximum retained entries
pub const PERFORMANCE_LOG_CAPACITY: usize = 50;

/// The sentinel explain reports when no index was usable
pub const COLLSCAN: &str = "COLLSCAN";

/// One executed-operation record
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceEntry {
    pub timestamp: DateTime<Utc>,

    pub operation: String,

    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,

    #[serde(rename = "documentsExamined", skip_serializing_if = "Option::is_none")]
    pub documents_examined: Option<u64>,

    #[serde(rename = "documentsReturned", skip_serializing_if = "Option::is_none")]
    pub documents_returned: Option<u64>,

    #[serde(rename = "indexUsed", skip_serializing_if = "Option::is_none")]
    pub index_used: Option<String>,
}

/// Append-only capped log, newest first
#[derive(Debug, Default)]
pub struct PerformanceLog {
    entries: Mutex<VecDeque<PerformanceEntry>>,
}

impl PerformanceLog {
    pub fn new() -> Self {
        PerformanceLog {
            entries: Mutex::new(VecDeque::with_capacity(PERFORMANCE_LOG_CAPACITY)),
        }
    }

    /// Prepend an entry, evicting the oldest past capacity
    pub fn record(&self, entry: PerformanceEntry) {
        let mut entries = self.entries.lock();
        entries.push_front(entry);
        entries.truncate(PERFORMANCE_LOG_CAPACITY);
    }

    /// Snapshot, newest first
    pub fn entries(&self) -> Vec<PerformanceEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// How many recent operations fell back to a full collection scan
    pub fn collscan_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.index_used.as_deref() == Some(COLLSCAN))
            .count()
    }
}
