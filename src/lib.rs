//! segcache - A cache policy engine over a segmented in-memory store
//!
//! Provides TTL and daily expiry rules, stale-while-revalidate, single-flight
//! lookups and generation, and a byte-budgeted store with per-entry expiry.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod policy;

pub use api::AppState;
pub use cache::{Item, Key, MemoryStore, Store};
pub use config::{Config, StoreConfig};
pub use error::{CacheError, Result};
pub use policy::{Generated, GenerateTimeout, Policy, PolicyKey, PolicyOptions, StaleIn};
