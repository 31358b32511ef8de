//! HTTP routes binding the operation pipeline to axum handlers
//!
//! Every operation endpoint answers with the uniform envelope: 200 on
//! success, 400 on request-shape validation failure, 500 on store
//! failure. Raw bodies are parsed here so a JSON syntax error surfaces
//! as the envelope's "Invalid JSON format" instead of a framework
//! rejection.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analyzer::RepoAnalyzer;
use crate::config::Config;
use crate::envelope::{Metrics, OperationResponse};
use crate::executor::{OperationExecutor, OperationKind, OperationOutcome};
use crate::gateway::StoreGateway;
use crate::perf_log::PerformanceLog;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub gateway: Arc<StoreGateway>,
    pub executor: OperationExecutor,
    pub analyzer: Arc<RepoAnalyzer>,
    pub perf_log: Arc<PerformanceLog>,
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/insert", post(insert))
        .route("/api/bulk-insert", post(bulk_insert))
        .route("/api/find", post(find))
        .route("/api/update", post(update))
        .route("/api/delete", post(delete))
        .route("/api/aggregate", post(aggregate))
        .route("/api/stats", get(stats))
        .route("/api/reset", post(reset))
        .route("/api/create-index", post(create_index))
        .route("/api/analyze-repo", post(analyze_repo))
        .route("/api/performance", get(performance))
        .route("/api/progress", get(progress))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ========== OPERATION ENDPOINTS ==========

async fn insert(State(state): State<Arc<AppState>>, body: String) -> Response {
    run_operation(&state, OperationKind::Insert, body)
}

async fn bulk_insert(State(state): State<Arc<AppState>>, body: String) -> Response {
    run_operation(&state, OperationKind::BulkInsert, body)
}

async fn find(State(state): State<Arc<AppState>>, body: String) -> Response {
    run_operation(&state, OperationKind::Find, body)
}

async fn update(State(state): State<Arc<AppState>>, body: String) -> Response {
    run_operation(&state, OperationKind::Update, body)
}

async fn delete(State(state): State<Arc<AppState>>, body: String) -> Response {
    run_operation(&state, OperationKind::Delete, body)
}

async fn aggregate(State(state): State<Arc<AppState>>, body: String) -> Response {
    run_operation(&state, OperationKind::Aggregate, body)
}

fn run_operation(state: &AppState, kind: OperationKind, body: String) -> Response {
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    envelope_response(state.executor.execute(kind, payload))
}

/// An absent body acts like `null` (find treats it as match-all); a
/// malformed one is the uniform "Invalid JSON format" failure.
fn parse_body(body: &str) -> Result<Value, Response> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|_| {
        let envelope =
            OperationResponse::failure("Invalid JSON format", Metrics::elapsed_only(0));
        (StatusCode::BAD_REQUEST, Json(envelope)).into_response()
    })
}

fn envelope_response(outcome: OperationOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.response)).into_response()
}

// ========== READ-ONLY / MAINTENANCE ENDPOINTS ==========

/// Collection statistics. A never-created collection reports zero-valued
/// stats with success=true rather than an error.
async fn stats(State(state): State<Arc<AppState>>) -> Response {
    let started = Instant::now();
    let stats = state.gateway.stats();
    let elapsed = started.elapsed().as_millis() as u64;

    let data = match serde_json::to_value(&stats) {
        Ok(data) => data,
        Err(e) => {
            return envelope_failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), elapsed)
        }
    };

    let metrics = Metrics::new("collStats", elapsed);
    (StatusCode::OK, Json(OperationResponse::ok(data, metrics))).into_response()
}

/// Delete every document in the collection. Destructive and irreversible;
/// intended only for demo teardown.
async fn reset(State(state): State<Arc<AppState>>) -> Response {
    let started = Instant::now();
    match state.gateway.reset() {
        Ok(deleted) => {
            let elapsed = started.elapsed().as_millis() as u64;
            let mut metrics = Metrics::new("deleteMany (reset)", elapsed);
            metrics.documents_deleted = Some(deleted);
            let data = json!({
                "deletedCount": deleted,
                "message": "Database has been reset successfully",
            });
            (StatusCode::OK, Json(OperationResponse::ok(data, metrics))).into_response()
        }
        Err(e) => {
            let elapsed = started.elapsed().as_millis() as u64;
            envelope_failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), elapsed)
        }
    }
}

/// Create a single-field index: `{key: {field: 1}, options: {unique?}}`
async fn create_index(State(state): State<Arc<AppState>>, body: String) -> Response {
    let started = Instant::now();
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let key = match payload.get("key").and_then(|k| k.as_object()) {
        Some(key) if !key.is_empty() => key.clone(),
        _ => {
            return envelope_failure(
                StatusCode::BAD_REQUEST,
                "Request must include \"key\" field with index specification".to_string(),
                0,
            )
        }
    };
    if key.len() > 1 {
        return envelope_failure(
            StatusCode::BAD_REQUEST,
            "Compound indexes are not supported".to_string(),
            0,
        );
    }
    let field = key.keys().next().cloned().unwrap_or_default();
    let unique = payload["options"]["unique"].as_bool().unwrap_or(false);

    match state.gateway.create_index(&field, unique) {
        Ok(index_name) => {
            let elapsed = started.elapsed().as_millis() as u64;
            info!(index = %index_name, "index created");
            let data = json!({
                "indexName": index_name,
                "key": Value::Object(key),
                "options": { "unique": unique },
            });
            let metrics = Metrics::new("createIndex", elapsed);
            (StatusCode::OK, Json(OperationResponse::ok(data, metrics))).into_response()
        }
        Err(e) => {
            let elapsed = started.elapsed().as_millis() as u64;
            envelope_failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), elapsed)
        }
    }
}

// ========== ANALYZER ==========

/// Analyze a public repository: `{"repoUrl": "https://github.com/o/r"}`.
/// The blocking fetch fan-out runs on the blocking pool.
async fn analyze_repo(State(state): State<Arc<AppState>>, body: String) -> Response {
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let url = match payload.get("repoUrl").and_then(|u| u.as_str()) {
        Some(url) => url.to_string(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "Repository URL is required"})),
            )
                .into_response()
        }
    };

    let analyzer = state.analyzer.clone();
    let result = tokio::task::spawn_blocking(move || analyzer.analyze(&url)).await;

    match result {
        Ok(Ok(analysis)) => {
            let mut value = serde_json::to_value(&analysis).unwrap_or_else(|_| json!({}));
            value["success"] = json!(true);
            (StatusCode::OK, Json(value)).into_response()
        }
        Ok(Err(err)) => {
            let status = StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                Json(json!({"success": false, "error": err.to_string()})),
            )
                .into_response()
        }
        Err(join_err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": join_err.to_string()})),
        )
            .into_response(),
    }
}

// ========== OBSERVABILITY ==========

async fn performance(State(state): State<Arc<AppState>>) -> Response {
    let entries = state.perf_log.entries();
    let data = json!({
        "entries": entries,
        "collscanCount": state.perf_log.collscan_count(),
    });
    (StatusCode::OK, Json(json!({"success": true, "data": data}))).into_response()
}

async fn progress(State(state): State<Arc<AppState>>) -> Response {
    let stages = state.executor.progress_snapshot();
    (
        StatusCode::OK,
        Json(json!({"success": true, "data": {"stages": stages}})),
    )
        .into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": crate::VERSION,
            "database": state.config.database,
            "collection": state.config.collection,
        })),
    )
}

fn envelope_failure(status: StatusCode, error: String, elapsed: u64) -> Response {
    (
        status,
        Json(OperationResponse::failure(
            error,
            Metrics::elapsed_only(elapsed),
        )),
    )
        .into_response()
}
