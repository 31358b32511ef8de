// Integration tests for the FlowBase operation pipeline

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use flowbase_server::{
    OperationExecutor, OperationKind, PerformanceLog, ProgressTracker, StoreGateway,
    PERFORMANCE_LOG_CAPACITY,
};

struct Harness {
    gateway: Arc<StoreGateway>,
    perf_log: Arc<PerformanceLog>,
    executor: OperationExecutor,
}

fn harness() -> Harness {
    let gateway = Arc::new(StoreGateway::connect("it_db", "it_collection"));
    let perf_log = Arc::new(PerformanceLog::new());
    let progress = Arc::new(Mutex::new(ProgressTracker::new()));
    let executor = OperationExecutor::new(gateway.clone(), perf_log.clone(), progress);
    Harness {
        gateway,
        perf_log,
        executor,
    }
}

fn data(outcome: flowbase_server::OperationOutcome) -> Value {
    assert!(outcome.response.success, "{:?}", outcome.response.error);
    outcome.response.data.unwrap()
}

#[test]
fn insert_then_find_round_trip() {
    let h = harness();
    let payload = json!({"name": "Dana", "age": 27, "tags": ["a", "b"]});
    h.executor.execute(OperationKind::Insert, payload.clone());

    let found = data(h.executor.execute(OperationKind::Find, json!({})));
    assert_eq!(found["count"], json!(1));

    let doc = &found["documents"][0];
    // Every non-server-assigned field matches the original payload
    for (key, value) in payload.as_object().unwrap() {
        assert_eq!(&doc[key], value, "field {} differs", key);
    }
    assert!(doc["_id"].is_string());
    assert!(doc["_createdAt"].is_string());
}

#[test]
fn bulk_insert_boundaries() {
    let h = harness();

    // L = 0
    let outcome = h
        .executor
        .execute(OperationKind::BulkInsert, json!([]));
    assert_eq!(outcome.status, 400);

    // L = 100
    let outcome = h.executor.execute(
        OperationKind::BulkInsert,
        Value::Array((0..100).map(|i| json!({"n": i})).collect()),
    );
    assert_eq!(data(outcome)["insertedCount"], json!(100));

    // L = 101: rejected with no partial insert
    let outcome = h.executor.execute(
        OperationKind::BulkInsert,
        Value::Array((0..101).map(|i| json!({"n": i})).collect()),
    );
    assert_eq!(outcome.status, 400);
    assert_eq!(h.gateway.stats().document_count, 100);
}

#[test]
fn stats_idempotent_on_fresh_collection() {
    let h = harness();
    let first = h.gateway.stats();
    let second = h.gateway.stats();
    assert_eq!(first.document_count, 0);
    assert_eq!(second.document_count, 0);
    assert_eq!(first.index_count, second.index_count);
    assert_eq!(first.storage_size, second.storage_size);
}

#[test]
fn stats_after_reset_idempotent() {
    let h = harness();
    for i in 0..3 {
        h.executor.execute(OperationKind::Insert, json!({"n": i}));
    }
    h.gateway.reset().unwrap();

    let first = h.gateway.stats();
    let second = h.gateway.stats();
    assert_eq!(first.document_count, 0);
    assert_eq!(second.document_count, 0);
}

#[test]
fn update_operator_preservation() {
    let h = harness();
    h.executor
        .execute(OperationKind::Insert, json!({"who": "x", "a": 0, "b": 1}));

    let outcome = h.executor.execute(
        OperationKind::Update,
        json!({
            "filter": {"who": "x"},
            "update": {"$set": {"a": 1}, "$inc": {"b": 1}}
        }),
    );
    assert_eq!(data(outcome)["modifiedCount"], json!(1));

    let found = data(h.executor.execute(OperationKind::Find, json!({"who": "x"})));
    let doc = &found["documents"][0];
    // $inc survived the $set injection unchanged
    assert_eq!(doc["b"], json!(2));
    // $set carries both the caller's field and the server timestamp
    assert_eq!(doc["a"], json!(1));
    assert!(doc["_updatedAt"].is_string());
}

#[test]
fn performance_log_keeps_newest_fifty() {
    let h = harness();
    for i in 0..60 {
        h.executor
            .execute(OperationKind::Insert, json!({"seq": i}));
    }

    let entries = h.perf_log.entries();
    assert_eq!(entries.len(), PERFORMANCE_LOG_CAPACITY);
    // All sixty ran; only the newest fifty remain
    assert_eq!(h.gateway.stats().document_count, 60);
}

#[test]
fn delete_all_guard() {
    let h = harness();
    let n = 7;
    for i in 0..n {
        h.executor.execute(OperationKind::Insert, json!({"n": i}));
    }

    // The most destructive legal input: the empty filter
    let outcome = h.executor.execute(OperationKind::Delete, json!({}));
    assert_eq!(data(outcome)["deletedCount"], json!(n));
    assert_eq!(h.gateway.stats().document_count, 0);
}

#[test]
fn aggregate_stage_echo_contract() {
    let h = harness();
    for (dept, age) in [("eng", 30), ("eng", 20), ("sales", 40)] {
        h.executor
            .execute(OperationKind::Insert, json!({"dept": dept, "age": age}));
    }

    let outcome = h.executor.execute(
        OperationKind::Aggregate,
        json!([
            {"$match": {"age": {"$gte": 25}}},
            {"$group": {"_id": "$dept", "count": {"$sum": 1}}}
        ]),
    );

    let echo = outcome.response.pipeline.as_ref().unwrap();
    assert_eq!(echo.len(), 2);
    assert_eq!(echo[0].stage, 1);
    assert_eq!(echo[0].operator, "$match");
    assert_eq!(echo[1].stage, 2);
    assert_eq!(echo[1].operator, "$group");

    let results = data(outcome);
    assert_eq!(results["count"], json!(2));
}

#[test]
fn missing_collection_stats_is_zero_valued_success() {
    let h = harness();
    // No document has ever been inserted; the collection does not exist
    let stats = h.gateway.stats();
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.storage_size, 0);
    assert_eq!(stats.index_count, 0);
    assert!(stats.indexes.is_empty());
}

#[test]
fn indexed_find_reports_index_in_metrics() {
    let h = harness();
    for age in [10, 20, 30, 40] {
        h.executor.execute(OperationKind::Insert, json!({"age": age}));
    }
    h.gateway.create_index("age", false).unwrap();

    let outcome = h
        .executor
        .execute(OperationKind::Find, json!({"age": {"$gt": 25}}));
    let metrics = &outcome.response.metrics;
    assert_eq!(metrics.index_used.as_deref(), Some("it_collection_age"));
    assert_eq!(metrics.documents_returned, Some(2));
    // Only the in-range documents were fetched
    assert_eq!(metrics.documents_examined, Some(2));

    let plan = outcome.response.query_plan.unwrap();
    assert_eq!(plan["winningPlan"]["inputStage"]["stage"], json!("IXSCAN"));
}

#[test]
fn validation_failures_skip_store_and_perf_log() {
    let h = harness();
    h.executor
        .execute(OperationKind::Update, json!({"filter": {}}));
    h.executor.execute(OperationKind::Insert, json!(42));
    h.executor
        .execute(OperationKind::Aggregate, json!({"$match": {}}));

    assert_eq!(h.gateway.stats().document_count, 0);
    assert!(h.perf_log.is_empty());
}
