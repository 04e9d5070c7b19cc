//! Lookup Module
//!
//! Policy keys and what a `get` hands back to its callers.

use serde_json::Value;

use crate::cache::{Cached, Item};
use crate::error::CacheError;

// == Policy Key ==
/// Key passed to [`Policy::get`](crate::policy::Policy::get).
///
/// Only `id` addresses the entry; `context` travels to the generator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyKey {
    pub id: String,
    pub context: Option<Value>,
}

impl PolicyKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: None,
        }
    }

    pub fn with_context(id: impl Into<String>, context: Value) -> Self {
        Self {
            id: id.into(),
            context: Some(context),
        }
    }
}

impl From<&str> for PolicyKey {
    fn from(id: &str) -> Self {
        PolicyKey::new(id)
    }
}

impl From<String> for PolicyKey {
    fn from(id: String) -> Self {
        PolicyKey::new(id)
    }
}

impl From<&String> for PolicyKey {
    fn from(id: &String) -> Self {
        PolicyKey::new(id.as_str())
    }
}

// == Report ==
/// Instrumentation for one lookup, shared by every waiter.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Time spent reading the store
    pub msec: u64,
    /// Store read error, or the generator error hidden by a stale fallback
    pub error: Option<CacheError>,
    pub stored: Option<u64>,
    /// TTL of the entry as read from the store
    pub ttl: Option<u64>,
    /// Set whenever an entry was found
    pub is_stale: Option<bool>,
}

// == Lookup ==
/// Successful outcome of a policy `get`.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The value, `None` on a miss without generator
    pub value: Option<Item>,
    /// The cached entry the value came from, if any. When served by the stale
    /// fallback its ttl is reduced by the stale timeout.
    pub cached: Option<Cached>,
    pub report: Report,
}

impl Lookup {
    pub(crate) fn from_cache(cached: Option<Cached>, report: Report) -> Self {
        Self {
            value: cached.as_ref().map(|entry| entry.item.clone()),
            cached,
            report,
        }
    }

    pub(crate) fn generated(value: Option<Item>, report: Report) -> Self {
        Self {
            value,
            cached: None,
            report,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.cached.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.cached.is_some() && self.report.is_stale == Some(true)
    }
}
