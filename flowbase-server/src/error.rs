//! Error types for the FlowBase server

use thiserror::Error;

/// Server-side operation error, mapped onto the uniform envelope.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Payload failed per-kind structural validation; the store was never
    /// contacted. Surfaced as HTTP 400.
    #[error("{0}")]
    RequestShape(String),

    /// The store call itself failed. The store's own message is passed
    /// through verbatim. Surfaced as HTTP 500.
    #[error("{0}")]
    Store(String),

    /// Repository analyzer failure: malformed URL (400) or upstream
    /// fetch failure (502).
    #[error("{0}")]
    ExternalAnalysis(String),
}

impl ServerError {
    pub fn http_status(&self) -> u16 {
        match self {
            ServerError::RequestShape(_) => 400,
            ServerError::Store(_) => 500,
            ServerError::ExternalAnalysis(_) => 502,
        }
    }
}

impl From<flowbase_core::FlowBaseError> for ServerError {
    fn from(err: flowbase_core::FlowBaseError) -> Self {
        ServerError::Store(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ServerError>;
