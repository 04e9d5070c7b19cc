//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{MemoryStore, Store};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HealthResponse, SetRequest, SetResponse, StatsResponse,
};
use crate::policy::{Policy, PolicyOptions};

/// Application state shared across all handlers.
///
/// Holds the policy serving one segment and the store behind it.
#[derive(Clone)]
pub struct AppState {
    /// Policy for the served segment
    pub policy: Policy,
    /// Backing store, kept for usage reporting and shutdown
    pub store: Arc<MemoryStore>,
}

impl AppState {
    /// Creates a new AppState over a started store.
    pub fn new(policy: Policy, store: Arc<MemoryStore>) -> Self {
        Self { policy, store }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Starts a memory store and binds a pass-through policy to the configured segment.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(MemoryStore::new(config.store_config()));
        store.start().await?;

        let options = PolicyOptions::new().expires_in(config.expires_in);
        let policy = Policy::new(options, Some(store.clone()), &config.segment)?;
        Ok(Self::new(policy, store))
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value under an id with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    // Validate request
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    state.policy.set(&req.id, req.value, req.ttl).await?;

    Ok(Json(SetResponse::new(req.id)))
}

/// Handler for GET /get/:id
///
/// Retrieves a value through the policy.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GetResponse>> {
    let lookup = state.policy.get(&id).await?;

    GetResponse::from_lookup(id.clone(), lookup)
        .map(Json)
        .ok_or(CacheError::NotFound(id))
}

/// Handler for DELETE /del/:id
///
/// Drops an id from the served segment.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.policy.drop(&id).await?;

    Ok(Json(DeleteResponse::new(id)))
}

/// Handler for GET /stats
///
/// Returns policy counters and store usage.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.policy.stats(),
        state.store.byte_size(),
        state.store.len(),
    ))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.policy.is_ready()))
}
