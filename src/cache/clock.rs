//! Clock Module
//!
//! Wall-clock milliseconds derived from the tokio monotonic clock.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

// == Clock ==
/// Epoch-millisecond clock anchored to a tokio [`Instant`].
///
/// Expiry timers run on tokio time, so timestamps are measured on the same
/// timeline. Under a paused runtime (`tokio::time::pause`) advancing the
/// tokio clock moves both together.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_ms: u64,
    anchor: Instant,
}

impl Clock {
    // == Constructor ==
    /// Creates a clock anchored at the current system time.
    pub fn system() -> Self {
        Self::starting_at(system_timestamp_ms())
    }

    /// Creates a clock whose current reading is `epoch_ms`.
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            anchor_ms: epoch_ms,
            anchor: Instant::now(),
        }
    }

    // == Now ==
    /// Returns the current time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Returns current Unix timestamp in milliseconds.
pub fn system_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
