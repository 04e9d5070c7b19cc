//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `id`: The entry id within the served segment
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in milliseconds (uses the policy rule if not specified)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The entry id
    pub id: String,
    /// The value to store
    pub value: Value,
    /// Optional TTL in milliseconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.id.is_empty() {
            return Some("Id cannot be empty".to_string());
        }
        None
    }
}
