//! Policy Statistics Module
//!
//! Tracks lookups, hits, stale reads, generations, writes and errors.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Stats ==
/// Snapshot of policy counters. Counters only grow for the life of the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Writes through the policy, including writes after generation
    pub sets: u64,
    /// Calls to `get`, one per caller
    pub gets: u64,
    /// Callers answered after a staleness verdict was reached
    pub hits: u64,
    /// Lookups that found a stale entry
    pub stales: u64,
    /// Generator invocations
    pub generates: u64,
    /// Store read, write and drop failures
    pub errors: u64,
}

impl Stats {
    // == Hit Rate ==
    /// Returns hits / gets, or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }
}

// == Counters ==
/// Live counters shared between concurrent lookups.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    sets: AtomicU64,
    gets: AtomicU64,
    hits: AtomicU64,
    stales: AtomicU64,
    generates: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    pub(crate) fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hits(&self, count: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stales.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_generate(&self) {
        self.generates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            sets: self.sets.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            stales: self.stales.load(Ordering::Relaxed),
            generates: self.generates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
