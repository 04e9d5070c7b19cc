//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::Item;
use crate::policy::{Lookup, Stats};

/// Response body for the GET operation (GET /get/:id)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested id
    pub id: String,
    /// The stored value
    pub value: Value,
    /// Insertion time in epoch milliseconds
    pub stored: Option<u64>,
    /// TTL recorded at insertion
    pub ttl: Option<u64>,
    /// Whether the entry was past its stale threshold
    pub is_stale: bool,
    /// Store read time in milliseconds
    pub msec: u64,
}

impl GetResponse {
    /// Builds a response from a policy lookup. Returns None on a miss.
    pub fn from_lookup(id: impl Into<String>, lookup: Lookup) -> Option<Self> {
        let value = match lookup.value? {
            Item::Json(value) => value,
            Item::Binary(bytes) => Value::from(bytes),
        };
        Some(Self {
            id: id.into(),
            value,
            stored: lookup.report.stored,
            ttl: lookup.report.ttl,
            is_stale: lookup.report.is_stale.unwrap_or(false),
            msec: lookup.report.msec,
        })
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The id that was set
    pub id: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            message: format!("Id '{}' set successfully", id),
            id,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:id)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The id that was dropped
    pub id: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            message: format!("Id '{}' deleted successfully", id),
            id,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Policy counters
    #[serde(flatten)]
    pub stats: Stats,
    /// Hit rate (hits / gets)
    pub hit_rate: f64,
    /// Bytes currently counted against the store budget
    pub byte_size: usize,
    /// Live entries in the store
    pub entries: usize,
}

impl StatsResponse {
    /// Creates a new StatsResponse from policy statistics and store usage
    pub fn new(stats: Stats, byte_size: usize, entries: usize) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
            byte_size,
            entries,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status ("healthy" or "unavailable")
    pub status: String,
    /// Whether the store is started
    pub ready: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn new(ready: bool) -> Self {
        Self {
            status: if ready { "healthy" } else { "unavailable" }.to_string(),
            ready,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
