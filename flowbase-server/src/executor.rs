//! Operation Executor - validation, store dispatch, timing and envelope
//!
//! `execute(kind, payload)` validates the payload shape for the chosen
//! operation, drives the Progress Tracker through the five pipeline
//! stages, invokes the Store Gateway, measures the store round-trip and
//! packages the uniform response envelope. Validation failures never
//! contact the store and are not recorded in the Performance Log (they
//! carry no execution metrics); every attempt that reaches the store is
//! recorded, successful or not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::envelope::{BsonConversion, Metrics, OperationResponse, PipelineStageEcho};
use crate::error::ServerError;
use crate::gateway::StoreGateway;
use crate::perf_log::{PerformanceEntry, PerformanceLog, COLLSCAN};
use crate::progress::{ProgressTracker, StageId, StageStatus};

/// Bulk inserts are rejected, not truncated, past this many documents
pub const MAX_BULK_DOCUMENTS: usize = 100;

/// Find responses cap the returned result set
pub const MAX_FIND_RESULTS: usize = 100;

/// The six user-selectable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    BulkInsert,
    Find,
    Update,
    Delete,
    Aggregate,
}

impl OperationKind {
    /// The driver-call name reported in metrics
    pub fn driver_name(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insertOne",
            OperationKind::BulkInsert => "insertMany",
            OperationKind::Find => "find",
            OperationKind::Update => "updateMany",
            OperationKind::Delete => "deleteMany",
            OperationKind::Aggregate => "aggregate",
        }
    }
}

/// Executor result: the envelope plus its HTTP-equivalent status
#[derive(Debug)]
pub struct OperationOutcome {
    pub response: OperationResponse,
    pub status: u16,
}

/// Payloads that survived per-kind structural validation
enum ValidatedRequest {
    Insert {
        fields: HashMap<String, Value>,
        original: Value,
    },
    BulkInsert {
        docs: Vec<HashMap<String, Value>>,
    },
    Find {
        filter: Value,
    },
    Update {
        filter: Value,
        update: Value,
    },
    Delete {
        filter: Value,
    },
    Aggregate {
        pipeline: Value,
    },
}

pub struct OperationExecutor {
    gateway: Arc<StoreGateway>,
    perf_log: Arc<PerformanceLog>,
    progress: Arc<Mutex<ProgressTracker>>,
}

impl OperationExecutor {
    pub fn new(
        gateway: Arc<StoreGateway>,
        perf_log: Arc<PerformanceLog>,
        progress: Arc<Mutex<ProgressTracker>>,
    ) -> Self {
        OperationExecutor {
            gateway,
            perf_log,
            progress,
        }
    }

    /// Execute one operation end to end
    pub fn execute(&self, kind: OperationKind, payload: Value) -> OperationOutcome {
        {
            let mut progress = self.progress.lock();
            progress.begin();
            progress.advance(
                StageId::Input,
                StageStatus::Active,
                Some("Validating payload"),
            );
        }

        let validated = match Self::validate(kind, payload) {
            Ok(validated) => validated,
            Err(message) => {
                warn!(operation = kind.driver_name(), %message, "request shape rejected");
                self.progress.lock().fail(&message);
                return OperationOutcome {
                    response: OperationResponse::failure(message, Metrics::elapsed_only(0)),
                    status: 400,
                };
            }
        };

        {
            let mut progress = self.progress.lock();
            progress.advance(StageId::Input, StageStatus::Completed, Some("Payload valid"));
            progress.advance(
                StageId::Prepare,
                StageStatus::Active,
                Some(kind.driver_name()),
            );
            progress.advance(StageId::Prepare, StageStatus::Completed, None);
            progress.advance(StageId::Remote, StageStatus::Active, None);
        }

        let started = Instant::now();
        let result = self.run(validated);
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut response) => {
                response.metrics.execution_time_ms = elapsed;
                if let Some(count) = response.metrics.documents_inserted {
                    if count > 0 {
                        response.metrics.avg_time_per_document =
                            Some(elapsed as f64 / count as f64);
                    }
                }

                {
                    let mut progress = self.progress.lock();
                    let remote_detail = format!("{}ms", elapsed);
                    progress.advance(
                        StageId::Remote,
                        StageStatus::Completed,
                        Some(remote_detail.as_str()),
                    );
                    progress.advance(StageId::Store, StageStatus::Active, None);
                    progress.advance(
                        StageId::Store,
                        StageStatus::Completed,
                        Some(kind.driver_name()),
                    );
                    progress.advance(StageId::Decode, StageStatus::Active, None);
                }

                self.record_performance(&response.metrics);
                info!(
                    operation = kind.driver_name(),
                    elapsed_ms = elapsed,
                    "operation completed"
                );

                self.progress
                    .lock()
                    .advance(StageId::Decode, StageStatus::Completed, Some("Complete"));

                OperationOutcome {
                    response,
                    status: 200,
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(operation = kind.driver_name(), error = %message, "store call failed");
                self.progress.lock().fail(&message);

                // The attempt reached the store, so it still gets logged
                self.record_performance(&Metrics::new(kind.driver_name(), elapsed));

                OperationOutcome {
                    response: OperationResponse::failure(message, Metrics::elapsed_only(elapsed)),
                    status: 500,
                }
            }
        }
    }

    /// Snapshot of the pipeline stages for the progress endpoint
    pub fn progress_snapshot(&self) -> Vec<crate::progress::StageState> {
        self.progress.lock().snapshot()
    }

    // ========== VALIDATION (never touches the store) ==========

    fn validate(kind: OperationKind, payload: Value) -> Result<ValidatedRequest, String> {
        match kind {
            OperationKind::Insert => match payload {
                Value::Object(map) => Ok(ValidatedRequest::Insert {
                    fields: map.clone().into_iter().collect(),
                    original: Value::Object(map),
                }),
                _ => Err("Invalid JSON body".to_string()),
            },
            OperationKind::BulkInsert => {
                let items = match payload {
                    Value::Array(items) => items,
                    _ => return Err("Request body must be an array of documents".to_string()),
                };
                if items.is_empty() {
                    return Err("Array cannot be empty".to_string());
                }
                if items.len() > MAX_BULK_DOCUMENTS {
                    return Err(format!(
                        "Maximum {} documents allowed per bulk insert",
                        MAX_BULK_DOCUMENTS
                    ));
                }
                let mut docs = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(map) => docs.push(map.into_iter().collect()),
                        _ => return Err("All documents must be JSON objects".to_string()),
                    }
                }
                Ok(ValidatedRequest::BulkInsert { docs })
            }
            OperationKind::Find => match payload {
                Value::Null => Ok(ValidatedRequest::Find { filter: json!({}) }),
                Value::Object(_) => Ok(ValidatedRequest::Find { filter: payload }),
                _ => Err("Query filter must be a JSON object".to_string()),
            },
            OperationKind::Update => {
                let obj = match payload.as_object() {
                    Some(obj) => obj,
                    None => {
                        return Err(
                            "Request must include \"filter\" and \"update\" fields".to_string()
                        )
                    }
                };
                let filter = obj.get("filter").filter(|f| f.is_object());
                let update = obj.get("update").filter(|u| u.is_object());
                match (filter, update) {
                    (Some(filter), Some(update)) => Ok(ValidatedRequest::Update {
                        filter: filter.clone(),
                        update: update.clone(),
                    }),
                    _ => Err("Request must include \"filter\" and \"update\" fields".to_string()),
                }
            }
            OperationKind::Delete => match payload {
                Value::Object(_) => Ok(ValidatedRequest::Delete { filter: payload }),
                _ => Err("Invalid filter query".to_string()),
            },
            OperationKind::Aggregate => {
                let stages = match payload.as_array() {
                    Some(stages) => stages,
                    None => return Err("Aggregation pipeline must be an array".to_string()),
                };
                if stages.is_empty() {
                    return Err("Aggregation pipeline cannot be empty".to_string());
                }
                if stages.iter().any(|s| !s.is_object()) {
                    return Err("Each pipeline stage must be an object".to_string());
                }
                Ok(ValidatedRequest::Aggregate { pipeline: payload })
            }
        }
    }

    // ========== STORE DISPATCH ==========

    fn run(&self, request: ValidatedRequest) -> Result<OperationResponse, ServerError> {
        match request {
            ValidatedRequest::Insert { fields, original } => self.run_insert(fields, original),
            ValidatedRequest::BulkInsert { docs } => self.run_bulk_insert(docs),
            ValidatedRequest::Find { filter } => self.run_find(filter),
            ValidatedRequest::Update { filter, update } => self.run_update(filter, update),
            ValidatedRequest::Delete { filter } => self.run_delete(filter),
            ValidatedRequest::Aggregate { pipeline } => self.run_aggregate(pipeline),
        }
    }

    fn run_insert(
        &self,
        mut fields: HashMap<String, Value>,
        original: Value,
    ) -> Result<OperationResponse, ServerError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        fields.insert("_createdAt".to_string(), json!(created_at));

        let id = self.gateway.insert_one(fields)?;
        let document = self.gateway.find_by_id(&id)?;

        let mut metrics = Metrics::new(OperationKind::Insert.driver_name(), 0);
        metrics.documents_affected = Some(1);

        // The teaching aid: the payload as sent next to its stored form
        // with the server-assigned pieces in tagged notation
        let converted = {
            let mut map = original.as_object().cloned().unwrap_or_default();
            map.insert("_id".to_string(), json!({ "$oid": id.as_string() }));
            map.insert("_createdAt".to_string(), json!({ "$date": created_at }));
            Value::Object(map)
        };

        let mut response = OperationResponse::ok(
            json!({
                "insertedId": id.as_string(),
                "acknowledged": true,
                "document": document,
            }),
            metrics,
        );
        response.bson_conversion = Some(BsonConversion {
            original,
            converted,
        });
        Ok(response)
    }

    fn run_bulk_insert(
        &self,
        mut docs: Vec<HashMap<String, Value>>,
    ) -> Result<OperationResponse, ServerError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for fields in &mut docs {
            fields.insert("_createdAt".to_string(), json!(created_at));
        }

        let result = self.gateway.insert_many(docs)?;

        let mut metrics = Metrics::new(OperationKind::BulkInsert.driver_name(), 0);
        metrics.documents_inserted = Some(result.inserted_count as u64);

        Ok(OperationResponse::ok(
            json!({
                "insertedCount": result.inserted_count,
                "insertedIds": result
                    .inserted_ids
                    .iter()
                    .map(|id| id.as_string())
                    .collect::<Vec<_>>(),
                "acknowledged": true,
            }),
            metrics,
        ))
    }

    fn run_find(&self, filter: Value) -> Result<OperationResponse, ServerError> {
        // Explain and data are independent reads; both complete before the
        // envelope is returned
        let plan = self.gateway.explain(&filter)?;
        let documents = self.gateway.find(&filter, MAX_FIND_RESULTS)?;

        let count = documents.len();
        let index_used = Self::index_used(&plan);
        let mut metrics = Metrics::new(OperationKind::Find.driver_name(), 0);
        metrics.documents_examined = plan["executionStats"]["totalDocsExamined"].as_u64();
        metrics.documents_returned = Some(count as u64);
        metrics.index_used = Some(index_used);

        let mut response = OperationResponse::ok(
            json!({
                "documents": documents,
                "count": count,
            }),
            metrics,
        );
        response.query_plan = Some(Self::query_plan_block(&plan));
        Ok(response)
    }

    fn run_update(&self, filter: Value, update: Value) -> Result<OperationResponse, ServerError> {
        let effective_update = Self::inject_updated_at(&update);
        let (matched, modified) = self.gateway.update_many(&filter, &effective_update)?;

        let mut metrics = Metrics::new(OperationKind::Update.driver_name(), 0);
        metrics.documents_matched = Some(matched);
        metrics.documents_modified = Some(modified);

        Ok(OperationResponse::ok(
            json!({
                "matchedCount": matched,
                "modifiedCount": modified,
                "acknowledged": true,
            }),
            metrics,
        ))
    }

    fn run_delete(&self, filter: Value) -> Result<OperationResponse, ServerError> {
        let deleted = self.gateway.delete_many(&filter)?;

        let mut metrics = Metrics::new(OperationKind::Delete.driver_name(), 0);
        metrics.documents_deleted = Some(deleted);

        Ok(OperationResponse::ok(
            json!({
                "deletedCount": deleted,
                "acknowledged": true,
            }),
            metrics,
        ))
    }

    fn run_aggregate(&self, pipeline: Value) -> Result<OperationResponse, ServerError> {
        // The plan is derived from the leading $match (the stage an index
        // could serve); anything else starts from a full scan
        let match_filter = pipeline
            .get(0)
            .and_then(|stage| stage.get("$match"))
            .filter(|f| f.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));

        let plan = self.gateway.explain(&match_filter)?;
        let results = self.gateway.aggregate(&pipeline)?;

        let stages = pipeline.as_array().cloned().unwrap_or_default();
        let echo: Vec<PipelineStageEcho> = stages
            .iter()
            .enumerate()
            .map(|(index, stage)| PipelineStageEcho {
                stage: index + 1,
                operator: stage
                    .as_object()
                    .and_then(|o| o.keys().next())
                    .cloned()
                    .unwrap_or_default(),
                details: stage.clone(),
            })
            .collect();

        let count = results.len();
        let mut metrics = Metrics::new(OperationKind::Aggregate.driver_name(), 0);
        metrics.stages_executed = Some(stages.len() as u64);
        metrics.documents_returned = Some(count as u64);
        metrics.documents_examined = plan["executionStats"]["totalDocsExamined"].as_u64();
        metrics.index_used = Some(Self::index_used(&plan));

        let mut response = OperationResponse::ok(
            json!({
                "results": results,
                "count": count,
            }),
            metrics,
        );
        response.pipeline = Some(echo);
        response.query_plan = Some(Self::query_plan_block(&plan));
        Ok(response)
    }

    // ========== HELPERS ==========

    /// Add the server-set `_updatedAt` into `$set` (creating it if absent)
    /// without disturbing any other operator the caller specified.
    fn inject_updated_at(update: &Value) -> Value {
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut update_doc = update.as_object().cloned().unwrap_or_default();
        let mut set_doc = update_doc
            .get("$set")
            .and_then(|s| s.as_object())
            .cloned()
            .unwrap_or_default();
        set_doc.insert("_updatedAt".to_string(), json!(updated_at));
        update_doc.insert("$set".to_string(), Value::Object(set_doc));

        Value::Object(update_doc)
    }

    /// Index name from a winning plan, or the COLLSCAN sentinel
    fn index_used(plan: &Value) -> String {
        plan["queryPlanner"]["winningPlan"]["inputStage"]["indexName"]
            .as_str()
            .unwrap_or(COLLSCAN)
            .to_string()
    }

    fn query_plan_block(plan: &Value) -> Value {
        json!({
            "winningPlan": plan["queryPlanner"]["winningPlan"],
            "executionStats": {
                "executionTimeMillis": plan["executionStats"]["executionTimeMillis"],
                "totalDocsExamined": plan["executionStats"]["totalDocsExamined"],
                "totalKeysExamined": plan["executionStats"]["totalKeysExamined"],
            },
        })
    }

    fn record_performance(&self, metrics: &Metrics) {
        self.perf_log.record(PerformanceEntry {
            timestamp: Utc::now(),
            operation: metrics.operation.clone(),
            execution_time_ms: metrics.execution_time_ms,
            documents_examined: metrics.documents_examined,
            documents_returned: metrics.documents_returned,
            index_used: metrics.index_used.clone(),
        });
    }
}
