//! Uniform response envelope shared by every operation endpoint
//!
//! `{success, data?, error?, metrics, pipeline?, queryPlan?, bsonConversion?}`
//! Exactly one of `data`/`error` is meaningful depending on `success`;
//! `metrics` is always present, even on failure (elapsed time only).

use serde::Serialize;
use serde_json::Value;

/// Operation response envelope
#[derive(Debug, Clone, Serialize)]
pub struct OperationResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub metrics: Metrics,

    /// Per-stage breakdown, aggregate only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<PipelineStageEcho>>,

    /// Explain output, find/aggregate only
    #[serde(rename = "queryPlan", skip_serializing_if = "Option::is_none")]
    pub query_plan: Option<Value>,

    /// Storage-encoding teaching aid, insert only
    #[serde(rename = "bsonConversion", skip_serializing_if = "Option::is_none")]
    pub bson_conversion: Option<BsonConversion>,
}

/// Execution metrics; the count fields are operation-specific
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,

    /// Empty (and omitted) only in the elapsed-only failure form
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation: String,

    #[serde(rename = "documentsAffected", skip_serializing_if = "Option::is_none")]
    pub documents_affected: Option<u64>,

    #[serde(rename = "documentsInserted", skip_serializing_if = "Option::is_none")]
    pub documents_inserted: Option<u64>,

    #[serde(rename = "avgTimePerDocument", skip_serializing_if = "Option::is_none")]
    pub avg_time_per_document: Option<f64>,

    #[serde(rename = "documentsExamined", skip_serializing_if = "Option::is_none")]
    pub documents_examined: Option<u64>,

    #[serde(rename = "documentsReturned", skip_serializing_if = "Option::is_none")]
    pub documents_returned: Option<u64>,

    #[serde(rename = "documentsMatched", skip_serializing_if = "Option::is_none")]
    pub documents_matched: Option<u64>,

    #[serde(rename = "documentsModified", skip_serializing_if = "Option::is_none")]
    pub documents_modified: Option<u64>,

    #[serde(rename = "documentsDeleted", skip_serializing_if = "Option::is_none")]
    pub documents_deleted: Option<u64>,

    #[serde(rename = "stagesExecuted", skip_serializing_if = "Option::is_none")]
    pub stages_executed: Option<u64>,

    #[serde(rename = "indexUsed", skip_serializing_if = "Option::is_none")]
    pub index_used: Option<String>,
}

impl Metrics {
    pub fn new(operation: &str, execution_time_ms: u64) -> Self {
        Metrics {
            execution_time_ms,
            operation: operation.to_string(),
            ..Metrics::default()
        }
    }

    /// Failure metrics carry only elapsed time
    pub fn elapsed_only(execution_time_ms: u64) -> Self {
        Metrics {
            execution_time_ms,
            ..Metrics::default()
        }
    }
}

/// One echoed aggregation stage (1-based)
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStageEcho {
    pub stage: usize,
    pub operator: String,
    pub details: Value,
}

/// Original payload next to its storage-encoded form
#[derive(Debug, Clone, Serialize)]
pub struct BsonConversion {
    pub original: Value,
    pub converted: Value,
}

impl OperationResponse {
    pub fn ok(data: Value, metrics: Metrics) -> Self {
        OperationResponse {
            success: true,
            data: Some(data),
            error: None,
            metrics,
            pipeline: None,
            query_plan: None,
            bson_conversion: None,
        }
    }

    pub fn failure(error: impl Into<String>, metrics: Metrics) -> Self {
        OperationResponse {
            success: false,
            data: None,
            error: Some(error.into()),
            metrics,
            pipeline: None,
            query_plan: None,
            bson_conversion: None,
        }
    }
}
