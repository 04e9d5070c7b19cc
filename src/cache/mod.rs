//! Cache Module
//!
//! Segmented in-memory storage with a byte budget and per-entry TTL expiry.

mod clock;
mod entry;
mod store;


// Re-export public types
pub use clock::{system_timestamp_ms, Clock};
pub use entry::{Cached, Item, Key};
pub use store::{MemoryStore, Store};

// == Public Constants ==
/// Largest TTL a store accepts, the maximum expiry timer delay (2^31 - 1 ms)
pub const MAX_TTL_MS: u64 = 2_147_483_647;

/// Fixed per-entry overhead counted against the byte budget
pub const ENTRY_OVERHEAD_BYTES: usize = 144;
