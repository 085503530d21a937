//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror. Only configuration errors
//! ever escape the cache service; everything else is caught, counted and logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No live backend connection could serve the request
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend command failed
    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// A stored payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid pool size, malformed address and similar startup problems
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Key not found in either tier
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Whether the error means the connection itself is unusable and should
    /// be re-established.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            CacheError::BackendUnavailable(_) => true,
            CacheError::Backend(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            _ => false,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::BackendUnavailable(_) | CacheError::Backend(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::Serialization(_)
            | CacheError::Configuration(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;
