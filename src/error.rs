//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Boxed error returned by generator functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// == Cache Error Enum ==
/// Unified error type for the store and the policy layer.
///
/// Errors are `Clone` because a single lookup outcome is fanned out to
/// every caller waiting on the same id.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Store used before `start` or after `stop`
    #[error("Connection not started")]
    NotStarted,

    /// Segment name is empty or contains a NUL byte
    #[error("Invalid segment name: {0}")]
    InvalidSegment(String),

    /// Policy options violate a configuration constraint
    #[error("Invalid cache policy configuration: {0}")]
    InvalidPolicy(String),

    /// TTL exceeds the maximum timer delay
    #[error("Invalid ttl (greater than {max}): {ttl}")]
    InvalidTtl { ttl: u64, max: u64 },

    /// Key id is empty
    #[error("Invalid key")]
    InvalidKey,

    /// Writing the entry would exceed the store byte budget
    #[error("Cache size limit reached: {requested} bytes requested, {available} available")]
    BudgetExceeded { requested: usize, available: usize },

    /// Stored payload could not be decoded
    #[error("Bad value content: {0}")]
    BadValue(String),

    /// Binary payload failed its sanity check
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// Generation did not finish within the generate timeout
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Generator function failed
    #[error("Generate failed: {0}")]
    Generate(Arc<dyn std::error::Error + Send + Sync>),

    /// Key not found in the cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a generator failure.
    pub fn generate(err: BoxError) -> Self {
        CacheError::Generate(Arc::from(err))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidSegment(_)
            | CacheError::InvalidPolicy(_)
            | CacheError::InvalidTtl { .. }
            | CacheError::InvalidKey
            | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::BudgetExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::NotStarted | CacheError::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::BadValue(_)
            | CacheError::CorruptEntry(_)
            | CacheError::Generate(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
