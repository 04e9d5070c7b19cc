//! Cache Store Module
//!
//! Segmented key/value storage with a byte budget and per-entry expiry timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::entry::{Envelope, Payload};
use crate::cache::{Cached, Clock, Item, Key, MAX_TTL_MS};
use crate::config::StoreConfig;
use crate::error::{CacheError, Result};

// == Store Trait ==
/// Storage contract consumed by the policy layer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepares the store for use. Calling it on a started store is a no-op.
    async fn start(&self) -> Result<()>;

    /// Discards every entry and cancels pending expiry.
    fn stop(&self);

    fn is_ready(&self) -> bool;

    fn validate_segment_name(&self, name: &str) -> Result<()>;

    /// Returns `Ok(None)` for unknown segments and ids.
    async fn get(&self, key: &Key) -> Result<Option<Cached>>;

    async fn set(&self, key: &Key, item: &Item, ttl: u64) -> Result<()>;

    /// Removing an absent key succeeds.
    async fn drop(&self, key: &Key) -> Result<()>;
}

// == Store State ==
#[derive(Debug, Default)]
struct State {
    segments: HashMap<String, HashMap<String, Envelope>>,
    /// Sum of `byte_size` over live entries
    byte_size: usize,
    next_generation: u64,
}

impl State {
    /// Unlinks an entry and releases its bytes. The timer is left to the caller.
    fn remove(&mut self, key: &Key) -> Option<Envelope> {
        let segment = self.segments.get_mut(&key.segment)?;
        let envelope = segment.remove(&key.id)?;
        if segment.is_empty() {
            self.segments.remove(&key.segment);
        }
        self.byte_size -= envelope.byte_size;
        Some(envelope)
    }

    fn len(&self) -> usize {
        self.segments.values().map(HashMap::len).sum()
    }
}

type Shared = Arc<Mutex<Option<State>>>;

fn lock(shared: &Mutex<Option<State>>) -> MutexGuard<'_, Option<State>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Memory Store ==
/// In-memory store with segments, a byte budget, and TTL expiry.
///
/// All mutations happen under one lock that is never held across an await,
/// so the byte counter is never observed half-updated.
#[derive(Debug)]
pub struct MemoryStore {
    shared: Shared,
    config: StoreConfig,
    clock: Clock,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates a stopped store. Call [`Store::start`] before use.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Clock::system())
    }

    pub fn with_clock(config: StoreConfig, clock: Clock) -> Self {
        Self {
            shared: Arc::new(Mutex::new(None)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // == Byte Size ==
    /// Current budget usage in bytes, 0 when stopped.
    pub fn byte_size(&self) -> usize {
        lock(&self.shared).as_ref().map_or(0, |state| state.byte_size)
    }

    // == Length ==
    /// Number of live entries across all segments.
    pub fn len(&self) -> usize {
        lock(&self.shared).as_ref().map_or(0, State::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recomputes budget usage from the live entries.
    #[cfg(test)]
    pub(crate) fn live_bytes(&self) -> usize {
        lock(&self.shared).as_ref().map_or(0, |state| {
            state
                .segments
                .values()
                .flat_map(HashMap::values)
                .map(|envelope| envelope.byte_size)
                .sum()
        })
    }

    fn schedule_expiry(&self, key: Key, generation: u64, ttl: u64) -> tokio::task::AbortHandle {
        let weak: Weak<Mutex<Option<State>>> = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ttl)).await;
            if let Some(shared) = weak.upgrade() {
                expire(&shared, &key, generation);
            }
        });
        task.abort_handle()
    }
}

/// Drops an entry whose timer fired, unless it was replaced in the meantime.
fn expire(shared: &Mutex<Option<State>>, key: &Key, generation: u64) {
    let mut guard = lock(shared);
    let Some(state) = guard.as_mut() else {
        return;
    };

    let current = state
        .segments
        .get(&key.segment)
        .and_then(|segment| segment.get(&key.id))
        .map(|envelope| envelope.generation);

    if current == Some(generation) {
        if let Some(envelope) = state.remove(key) {
            debug!(
                segment = %key.segment,
                id = %key.id,
                bytes = envelope.byte_size,
                "Entry expired"
            );
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn start(&self) -> Result<()> {
        let mut guard = lock(&self.shared);
        if guard.is_none() {
            *guard = Some(State::default());
            info!(
                max_byte_size = self.config.max_byte_size,
                "Memory store started"
            );
        }
        Ok(())
    }

    fn stop(&self) {
        let mut guard = lock(&self.shared);
        if let Some(mut state) = guard.take() {
            let mut count = 0;
            for segment in state.segments.values_mut() {
                for envelope in segment.values_mut() {
                    envelope.cancel_timer();
                    count += 1;
                }
            }
            info!(entries = count, "Memory store stopped");
        }
    }

    fn is_ready(&self) -> bool {
        lock(&self.shared).is_some()
    }

    fn validate_segment_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CacheError::InvalidSegment("Empty string".to_string()));
        }
        if name.contains('\0') {
            return Err(CacheError::InvalidSegment(
                "Includes null character".to_string(),
            ));
        }
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<Cached>> {
        let guard = lock(&self.shared);
        let state = guard.as_ref().ok_or(CacheError::NotStarted)?;

        let Some(envelope) = state
            .segments
            .get(&key.segment)
            .and_then(|segment| segment.get(&key.id))
        else {
            return Ok(None);
        };

        envelope.snapshot().map(Some)
    }

    async fn set(&self, key: &Key, item: &Item, ttl: u64) -> Result<()> {
        let mut guard = lock(&self.shared);
        let state = guard.as_mut().ok_or(CacheError::NotStarted)?;

        if ttl > MAX_TTL_MS {
            return Err(CacheError::InvalidTtl { ttl, max: MAX_TTL_MS });
        }

        let payload = Payload::encode(item, self.config.allow_mixed_content)?;
        state.next_generation += 1;
        let generation = state.next_generation;
        let mut envelope = Envelope::new(key, payload, self.clock.now_ms(), ttl, generation);

        // The previous entry is released before the budget check, so a
        // rejected overwrite loses the old value.
        if let Some(mut previous) = state.remove(key) {
            previous.cancel_timer();
        }

        let max = self.config.max_byte_size;
        if max != 0 && state.byte_size + envelope.byte_size > max {
            warn!(
                segment = %key.segment,
                id = %key.id,
                requested = envelope.byte_size,
                used = state.byte_size,
                max,
                "Cache size limit reached"
            );
            return Err(CacheError::BudgetExceeded {
                requested: envelope.byte_size,
                available: max.saturating_sub(state.byte_size),
            });
        }

        envelope.timer = Some(self.schedule_expiry(key.clone(), generation, ttl));
        state.byte_size += envelope.byte_size;
        state
            .segments
            .entry(key.segment.clone())
            .or_default()
            .insert(key.id.clone(), envelope);

        Ok(())
    }

    async fn drop(&self, key: &Key) -> Result<()> {
        let mut guard = lock(&self.shared);
        let state = guard.as_mut().ok_or(CacheError::NotStarted)?;

        if let Some(mut envelope) = state.remove(key) {
            envelope.cancel_timer();
        }
        Ok(())
    }
}
