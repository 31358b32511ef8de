// flowbase-core/src/error.rs

use thiserror::Error;

/// FlowBase store error
#[derive(Debug, Error)]
pub enum FlowBaseError {
    /// Collection does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Query filter is malformed or uses an unknown operator
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Update document is malformed or an operator cannot be applied
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Aggregation pipeline is malformed or a stage failed
    #[error("Aggregation error: {0}")]
    AggregationError(String),

    /// Index creation or maintenance failed
    #[error("Index error: {0}")]
    IndexError(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FlowBaseError {
    fn from(err: serde_json::Error) -> Self {
        FlowBaseError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FlowBaseError>;
