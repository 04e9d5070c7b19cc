//! Policy Module
//!
//! TTL and stale rules, single-flight lookups and generation on top of a [`Store`].
//!
//! A lookup for an id runs at most once at a time: callers arriving while it
//! is in flight wait for the same outcome. When the rule has a generator,
//! misses and stale hits invoke it, bounded by the stale and generate
//! timeouts; whichever of the generator and the fallback timer answers first
//! wins and later answers are discarded.

mod generator;
mod lookup;
mod rule;
mod stats;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{Cached, Clock, Item, Key, Store};
use crate::error::{BoxError, CacheError, Result};

pub use generator::{Generated, Generator};
pub use lookup::{Lookup, PolicyKey, Report};
pub use rule::{Expiry, GenerateTimeout, PolicyOptions, Rule, StaleFn, StaleIn, DAY_MS};
pub use stats::Stats;

use stats::Counters;

type Outcome = Result<Lookup>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Policy ==
/// Cache policy bound to one segment of a shared store.
///
/// Cloning is cheap and clones share pending tables and statistics.
#[derive(Clone)]
pub struct Policy {
    inner: Arc<Inner>,
}

struct Inner {
    rule: Rule,
    store: Option<Arc<dyn Store>>,
    segment: String,
    clock: Clock,
    /// Callers waiting on the in-flight lookup, per id
    pendings: Mutex<HashMap<String, Vec<oneshot::Sender<Outcome>>>>,
    /// In-flight generator claims, per id
    pending_generates: Mutex<HashMap<String, u64>>,
    next_claim: AtomicU64,
    stats: Counters,
}

/// Generator claim for one id.
enum Claim {
    /// Guard disabled (`pending_generate_timeout == 0`)
    Unguarded,
    Guarded(u64),
}

impl Policy {
    // == Constructor ==
    /// Compiles `options` and binds the policy to `segment` of `store`.
    ///
    /// Without a store the policy only runs generators and never caches.
    pub fn new(
        options: PolicyOptions,
        store: Option<Arc<dyn Store>>,
        segment: &str,
    ) -> Result<Self> {
        Self::with_clock(options, store, segment, Clock::system())
    }

    pub fn with_clock(
        options: PolicyOptions,
        store: Option<Arc<dyn Store>>,
        segment: &str,
        clock: Clock,
    ) -> Result<Self> {
        let rule = Rule::compile(&options, store.is_some())?;

        if let Some(store) = &store {
            store.validate_segment_name(segment).map_err(|err| match err {
                CacheError::InvalidSegment(reason) => {
                    CacheError::InvalidSegment(format!("{segment:?} ({reason})"))
                }
                other => other,
            })?;
        }

        Ok(Self {
            inner: Arc::new(Inner {
                rule,
                store,
                segment: segment.to_string(),
                clock,
                pendings: Mutex::new(HashMap::new()),
                pending_generates: Mutex::new(HashMap::new()),
                next_claim: AtomicU64::new(0),
                stats: Counters::default(),
            }),
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.inner.rule
    }

    pub fn segment(&self) -> &str {
        &self.inner.segment
    }

    // == Get ==
    /// Looks up `key`, generating the value when the rule says so.
    ///
    /// Concurrent calls for the same id share one store read and receive the
    /// same outcome. A stale value may be returned together with a generation
    /// error in [`Report::error`] when `drop_on_error` is off.
    pub async fn get(&self, key: impl Into<PolicyKey>) -> Result<Lookup> {
        let key = key.into();
        self.inner.stats.record_get();

        let (tx, rx) = oneshot::channel();
        let leader = match lock(&self.inner.pendings).entry(key.id.clone()) {
            Entry::Occupied(mut waiters) => {
                waiters.get_mut().push(tx);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
                true
            }
        };

        if leader {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.run_lookup(key));
        }

        rx.await
            .unwrap_or_else(|_| Err(CacheError::Internal("lookup abandoned".to_string())))
    }

    // == Set ==
    /// Stores `item` under `key`. Without a TTL the rule's TTL applies.
    pub async fn set(
        &self,
        key: impl Into<PolicyKey>,
        item: impl Into<Item>,
        ttl: Option<u64>,
    ) -> Result<()> {
        self.inner.set(&key.into().id, &item.into(), ttl).await
    }

    // == Drop ==
    pub async fn drop(&self, key: impl Into<PolicyKey>) -> Result<()> {
        self.inner.remove(&key.into().id).await
    }

    // == TTL ==
    /// Remaining TTL under the rule for an item created at `created`.
    pub fn ttl(&self, created: Option<u64>) -> u64 {
        self.inner.rule.ttl(created, self.inner.clock.now_ms())
    }

    pub fn is_ready(&self) -> bool {
        self.inner
            .store
            .as_ref()
            .is_some_and(|store| store.is_ready())
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("segment", &self.inner.segment)
            .field("rule", &self.inner.rule)
            .field("server_side", &self.inner.store.is_some())
            .field("stats", &self.inner.stats.snapshot())
            .finish()
    }
}

// == Responder ==
/// Answers the waiters of one lookup exactly once.
#[derive(Clone)]
struct Responder {
    inner: Arc<Inner>,
    id: String,
    fired: Arc<AtomicBool>,
}

impl Responder {
    fn new(inner: Arc<Inner>, id: String) -> Self {
        Self {
            inner,
            id,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `stale_verdict` is true when an entry was found and judged.
    fn respond(&self, outcome: Outcome, stale_verdict: bool) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.fan_out(&self.id, outcome, stale_verdict);
    }
}

impl Inner {
    fn key(&self, id: &str) -> Key {
        Key::new(self.segment.as_str(), id)
    }

    async fn read(&self, id: &str) -> Result<Option<Cached>> {
        match &self.store {
            Some(store) => store.get(&self.key(id)).await,
            None => Ok(None),
        }
    }

    async fn set(&self, id: &str, item: &Item, ttl: Option<u64>) -> Result<()> {
        self.stats.record_set();
        let Some(store) = &self.store else {
            return Ok(());
        };

        let ttl = match ttl {
            Some(ttl) if ttl > 0 => ttl,
            _ => self.rule.ttl(None, self.clock.now_ms()),
        };
        // Already expired under the rule
        if ttl == 0 {
            return Ok(());
        }
        let result = store.set(&self.key(id), item, ttl).await;
        if let Err(err) = &result {
            self.stats.record_error();
            debug!(segment = %self.segment, id, error = %err, "Policy write failed");
        }
        result
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if id.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        let result = Store::drop(store.as_ref(), &self.key(id)).await;
        if result.is_err() {
            self.stats.record_error();
        }
        result
    }

    fn is_stale(&self, cached: &Cached) -> bool {
        let Some(stale_in) = &self.rule.stale_in else {
            return false;
        };
        let stale_in = stale_in.resolve(cached.stored, cached.ttl);
        stale_in > 0 && self.clock.now_ms().saturating_sub(cached.stored) >= stale_in
    }

    /// Delivers `outcome` to every waiter on `id`, in arrival order.
    fn fan_out(&self, id: &str, outcome: Outcome, stale_verdict: bool) {
        let waiters = lock(&self.pendings).remove(id).unwrap_or_default();
        if stale_verdict {
            self.stats.record_hits(waiters.len() as u64);
        }
        for waiter in waiters {
            // The caller may have stopped waiting
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_lookup(self: Arc<Self>, key: PolicyKey) {
        let responder = Responder::new(Arc::clone(&self), key.id.clone());
        let task = tokio::spawn(Arc::clone(&self).lookup(key, responder.clone()));

        if let Err(err) = task.await {
            warn!(segment = %self.segment, id = %responder.id, error = %err, "Lookup task failed");
            responder.respond(
                Err(CacheError::Internal(format!("lookup failed: {err}"))),
                false,
            );
        }
    }

    async fn lookup(self: Arc<Self>, key: PolicyKey, responder: Responder) {
        let started = Instant::now();
        let (error, cached) = match self.read(&key.id).await {
            Ok(cached) => (None, cached),
            Err(err) => {
                self.stats.record_error();
                (Some(err), None)
            }
        };

        let mut report = Report {
            msec: started.elapsed().as_millis() as u64,
            error: error.clone(),
            ..Report::default()
        };

        let mut is_stale = false;
        if let Some(entry) = &cached {
            is_stale = self.is_stale(entry);
            report.stored = Some(entry.stored);
            report.ttl = Some(entry.ttl);
            report.is_stale = Some(is_stale);
            if is_stale {
                self.stats.record_stale();
            }
        }
        let verdict = report.is_stale.is_some();

        let regenerate = self.rule.generator.is_some()
            && (error.is_none() || self.rule.generate_on_read_error);
        if !regenerate {
            let outcome = match error {
                Some(err) => Err(err),
                None => Ok(Lookup::from_cache(cached, report)),
            };
            responder.respond(outcome, verdict);
            return;
        }

        match cached {
            Some(entry) if !is_stale => {
                responder.respond(Ok(Lookup::from_cache(Some(entry), report)), verdict);
            }
            cached => self.generate(key, cached, report, responder).await,
        }
    }

    async fn generate(
        self: Arc<Self>,
        key: PolicyKey,
        cached: Option<Cached>,
        report: Report,
        responder: Responder,
    ) {
        let Some(generator) = self.rule.generator.clone() else {
            return;
        };
        let verdict = report.is_stale.is_some();
        let mut fallback = false;
        let mut cached = cached;

        if let Some(entry) = &mut cached {
            // Callers served from the stale entry see the ttl left after the wait
            let timeout = self.rule.stale_timeout;
            entry.ttl = entry.ttl.saturating_sub(timeout);
            if entry.ttl > 0 {
                fallback = true;
                let responder = responder.clone();
                let stale = Lookup::from_cache(Some(entry.clone()), report.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(timeout)).await;
                    responder.respond(Ok(stale), verdict);
                });
            }
        } else if let Some(timeout) = self.rule.generate_timeout {
            fallback = true;
            let responder = responder.clone();
            let segment = self.segment.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout)).await;
                if !responder.fired.load(Ordering::Acquire) {
                    warn!(segment = %segment, id = %responder.id, timeout, "Generate timed out");
                }
                responder.respond(Err(CacheError::ServiceUnavailable), verdict);
            });
        }

        let Some(claim) = self.claim_generate(&key.id) else {
            debug!(segment = %self.segment, id = %key.id, "Generate already in flight");
            if !fallback {
                let outcome = match cached {
                    Some(entry) => Ok(Lookup::from_cache(Some(entry), report)),
                    None => Err(CacheError::ServiceUnavailable),
                };
                responder.respond(outcome, verdict);
            }
            return;
        };

        self.stats.record_generate();
        debug!(segment = %self.segment, id = %key.id, stale = cached.is_some(), "Generating");

        let task_key = key.clone();
        let task = tokio::spawn(async move { generator.generate(&task_key).await });
        match task.await {
            Ok(result) => {
                self.complete(&key.id, claim, result, cached, report, responder)
                    .await;
            }
            Err(err) => {
                self.release_generate(&key.id, &claim);
                warn!(segment = %self.segment, id = %key.id, error = %err, "Generator panicked");
                responder.respond(
                    Err(CacheError::generate(format!("generator failed: {err}").into())),
                    verdict,
                );
            }
        }
    }

    async fn complete(
        &self,
        id: &str,
        claim: Claim,
        result: std::result::Result<Generated, BoxError>,
        cached: Option<Cached>,
        report: Report,
        responder: Responder,
    ) {
        self.release_generate(id, &claim);
        let verdict = report.is_stale.is_some();

        let (generate_error, generated) = match result {
            Ok(generated) => (None, Some(generated)),
            Err(err) => {
                warn!(segment = %self.segment, id, error = %err, "Generator returned an error");
                (Some(CacheError::generate(err)), None)
            }
        };

        let write_error = match &generated {
            Some(generated) if generated.ttl == Some(0) => self.remove(id).await.err(),
            Some(generated) => self.set(id, &generated.item, generated.ttl).await.err(),
            None if self.rule.drop_on_error => self.remove(id).await.err(),
            None => None,
        };

        let error = generate_error.or(if self.rule.generate_ignore_write_error {
            None
        } else {
            write_error
        });

        match (error, cached) {
            (Some(err), Some(entry)) if !self.rule.drop_on_error => {
                let report = Report {
                    error: Some(err),
                    ..report
                };
                responder.respond(Ok(Lookup::from_cache(Some(entry), report)), verdict);
            }
            (Some(err), _) => responder.respond(Err(err), verdict),
            (None, _) => {
                let value = generated.map(|generated| generated.item);
                responder.respond(Ok(Lookup::generated(value, report)), verdict);
            }
        }
    }

    /// Claims the right to run the generator for `id`, `None` if already taken.
    fn claim_generate(self: &Arc<Self>, id: &str) -> Option<Claim> {
        let timeout = self.rule.pending_generate_timeout;
        if timeout == 0 {
            return Some(Claim::Unguarded);
        }

        let token = self.next_claim.fetch_add(1, Ordering::Relaxed) + 1;
        match lock(&self.pending_generates).entry(id.to_string()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(token);
            }
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout)).await;
            if let Some(inner) = weak.upgrade() {
                inner.release_generate(&id, &Claim::Guarded(token));
            }
        });

        Some(Claim::Guarded(token))
    }

    fn release_generate(&self, id: &str, claim: &Claim) {
        if let Claim::Guarded(token) = claim {
            let mut pending = lock(&self.pending_generates);
            if pending.get(id) == Some(token) {
                pending.remove(id);
            }
        }
    }
}
