//! Generator Module
//!
//! The function a policy calls to produce missing or stale values.

use std::future::Future;

use async_trait::async_trait;

use crate::cache::Item;
use crate::error::BoxError;
use crate::policy::PolicyKey;

// == Generated ==
/// A freshly generated value.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub item: Item,
    /// TTL override in milliseconds. `None` uses the rule's TTL, `Some(0)`
    /// drops the cached entry instead of storing the value.
    pub ttl: Option<u64>,
}

impl Generated {
    pub fn new(item: impl Into<Item>) -> Self {
        Self {
            item: item.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

// == Generator ==
/// Produces the value for a key on a cache miss or stale hit.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, key: &PolicyKey) -> Result<Generated, BoxError>;
}

#[async_trait]
impl<F, Fut> Generator for F
where
    F: Fn(PolicyKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Generated, BoxError>> + Send + 'static,
{
    async fn generate(&self, key: &PolicyKey) -> Result<Generated, BoxError> {
        (self)(key.clone()).await
    }
}
