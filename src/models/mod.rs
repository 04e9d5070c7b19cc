//! HTTP body models
//!
//! Request and response shapes for the segment endpoints. Lookup results are
//! flattened into [`GetResponse`] together with their report fields.

pub mod requests;
pub mod responses;

pub use requests::SetRequest;
pub use responses::{
    DeleteResponse, ErrorResponse, GetResponse, HealthResponse, SetResponse, StatsResponse,
};
