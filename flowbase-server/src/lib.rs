//! FlowBase server - HTTP teaching API over the FlowBase document store

pub mod analyzer;
pub mod config;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod perf_log;
pub mod progress;
pub mod routes;

// Re-export main types
pub use analyzer::{AnalysisResult, RepoAnalyzer, MAX_ANALYZED_FILES};
pub use config::{load_config, Config};
pub use envelope::{Metrics, OperationResponse};
pub use error::{Result, ServerError};
pub use executor::{OperationExecutor, OperationKind, OperationOutcome, MAX_BULK_DOCUMENTS, MAX_FIND_RESULTS};
pub use gateway::StoreGateway;
pub use perf_log::{PerformanceEntry, PerformanceLog, COLLSCAN, PERFORMANCE_LOG_CAPACITY};
pub use progress::{ProgressTracker, StageId, StageStatus};
pub use routes::{build_router, AppState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
