// HTTP-level tests for the FlowBase router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use flowbase_server::routes::AppState;
use flowbase_server::{
    build_router, Config, OperationExecutor, PerformanceLog, ProgressTracker, RepoAnalyzer,
    StoreGateway,
};

fn test_state() -> Arc<AppState> {
    let config = Config::default();
    let gateway = Arc::new(StoreGateway::connect(&config.database, &config.collection));
    let perf_log = Arc::new(PerformanceLog::new());
    let progress = Arc::new(Mutex::new(ProgressTracker::new()));
    let executor = OperationExecutor::new(gateway.clone(), perf_log.clone(), progress);
    let analyzer = Arc::new(RepoAnalyzer::new(None));
    Arc::new(AppState {
        config,
        gateway,
        executor,
        analyzer,
        perf_log,
    })
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn insert_endpoint_returns_envelope() {
    let app = build_router(test_state());
    let response = app
        .oneshot(post("/api/insert", r#"{"name": "Alice"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["data"]["document"]["name"], json!("Alice"));
    assert_eq!(value["metrics"]["operation"], json!("insertOne"));
    assert!(value["bsonConversion"]["converted"]["_id"]["$oid"].is_string());
}

#[tokio::test]
async fn malformed_json_body_is_a_400_envelope() {
    let app = build_router(test_state());
    let response = app
        .oneshot(post("/api/insert", "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    assert_eq!(value["success"], json!(false));
    assert_eq!(value["error"], json!("Invalid JSON format"));
}

#[tokio::test]
async fn update_shape_violation_is_400() {
    let app = build_router(test_state());
    let response = app
        .oneshot(post("/api/update", r#"{"filter": {}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn find_with_empty_body_matches_all() {
    let state = test_state();
    let app = build_router(state.clone());

    app.clone()
        .oneshot(post("/api/insert", r#"{"n": 1}"#))
        .await
        .unwrap();

    let response = app.oneshot(post("/api/find", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["data"]["count"], json!(1));
}

#[tokio::test]
async fn stats_endpoint_zero_valued_before_first_insert() {
    let app = build_router(test_state());
    let response = app.oneshot(get("/api/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["data"]["documentCount"], json!(0));
    assert_eq!(value["data"]["indexCount"], json!(0));
    assert_eq!(value["metrics"]["operation"], json!("collStats"));
}

#[tokio::test]
async fn reset_endpoint_reports_deleted_count() {
    let state = test_state();
    let app = build_router(state.clone());

    for i in 0..3 {
        app.clone()
            .oneshot(post("/api/insert", &format!(r#"{{"n": {}}}"#, i)))
            .await
            .unwrap();
    }

    let response = app.oneshot(post("/api/reset", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["data"]["deletedCount"], json!(3));
    assert_eq!(value["metrics"]["operation"], json!("deleteMany (reset)"));
}

#[tokio::test]
async fn create_index_endpoint() {
    let app = build_router(test_state());
    let response = app
        .clone()
        .oneshot(post("/api/create-index", r#"{"key": {"age": 1}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["data"]["indexName"], json!("demo_collection_age"));

    // Missing key spec is a request-shape failure
    let response = app
        .oneshot(post("/api/create-index", r#"{"name": "idx"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analyze_repo_requires_url() {
    let app = build_router(test_state());
    let response = app
        .oneshot(post("/api/analyze-repo", r#"{}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    assert_eq!(value["error"], json!("Repository URL is required"));
}

#[tokio::test]
async fn performance_and_progress_endpoints() {
    let state = test_state();
    let app = build_router(state.clone());

    app.clone()
        .oneshot(post("/api/insert", r#"{"n": 1}"#))
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/api/performance")).await.unwrap();
    let value = body_json(response).await;
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["data"]["entries"].as_array().unwrap().len(), 1);

    let response = app.oneshot(get("/api/progress")).await.unwrap();
    let value = body_json(response).await;
    let stages = value["data"]["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 5);
    assert!(stages.iter().all(|s| s["status"] == json!("completed")));
}

#[tokio::test]
async fn health_endpoint() {
    let app = build_router(test_state());
    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["status"], json!("ok"));
}
