//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value under an id
//! - `GET /get/:id` - Look up an id through the policy
//! - `DELETE /del/:id` - Drop an id
//! - `GET /stats` - Policy counters and store usage
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
