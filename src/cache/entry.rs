//! Cache Entry Module
//!
//! Keys, items, and the stored envelope with its byte accounting.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::cache::ENTRY_OVERHEAD_BYTES;
use crate::error::{CacheError, Result};

// == Key ==
/// Address of an entry: a segment namespace and an id unique within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub segment: String,
    pub id: String,
}

impl Key {
    pub fn new(segment: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            id: id.into(),
        }
    }
}

// == Item ==
/// A value handed to or returned from a store.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Structured value, stored in canonical JSON form
    Json(Value),
    /// Raw bytes, stored as-is when the store allows mixed content
    Binary(Vec<u8>),
}

impl Item {
    /// Builds a JSON item from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Item::Json)
            .map_err(|e| CacheError::BadValue(e.to_string()))
    }

    /// Decodes a JSON item into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Item::Json(value) => {
                T::deserialize(value).map_err(|e| CacheError::BadValue(e.to_string()))
            }
            Item::Binary(_) => Err(CacheError::BadValue(
                "binary item cannot be decoded as structured value".to_string(),
            )),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Item::Json(value) => Some(value),
            Item::Binary(_) => None,
        }
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Item::Json(value)
    }
}

impl From<Vec<u8>> for Item {
    fn from(bytes: Vec<u8>) -> Self {
        Item::Binary(bytes)
    }
}

// == Cached ==
/// Read-only snapshot of a stored entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub item: Item,
    /// Insertion time in epoch milliseconds
    pub stored: u64,
    /// TTL given at insertion, in milliseconds
    pub ttl: u64,
}

// == Payload ==
/// Stored form of an item.
#[derive(Debug)]
pub(crate) enum Payload {
    Serialized(String),
    Binary { bytes: Vec<u8>, len: usize },
}

impl Payload {
    /// Encodes an item. Binary items are copied only when mixed content is allowed.
    pub(crate) fn encode(item: &Item, allow_mixed_content: bool) -> Result<Self> {
        match item {
            Item::Binary(bytes) if allow_mixed_content => Ok(Payload::Binary {
                bytes: bytes.clone(),
                len: bytes.len(),
            }),
            Item::Binary(bytes) => serde_json::to_string(bytes)
                .map(Payload::Serialized)
                .map_err(|e| CacheError::BadValue(e.to_string())),
            Item::Json(value) => serde_json::to_string(value)
                .map(Payload::Serialized)
                .map_err(|e| CacheError::BadValue(e.to_string())),
        }
    }

    pub(crate) fn decode(&self) -> Result<Item> {
        match self {
            Payload::Binary { bytes, len } => {
                if bytes.len() != *len {
                    return Err(CacheError::CorruptEntry(format!(
                        "binary payload is {} bytes, recorded {}",
                        bytes.len(),
                        len
                    )));
                }
                Ok(Item::Binary(bytes.clone()))
            }
            Payload::Serialized(text) => serde_json::from_str(text)
                .map(Item::Json)
                .map_err(|e| CacheError::BadValue(e.to_string())),
        }
    }

    fn byte_len(&self) -> usize {
        match self {
            Payload::Serialized(text) => text.len(),
            Payload::Binary { len, .. } => *len,
        }
    }
}

// == Envelope ==
/// A stored entry with its expiry timer.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) payload: Payload,
    pub(crate) stored: u64,
    pub(crate) ttl: u64,
    /// Footprint snapshot used for budget accounting, never recomputed
    pub(crate) byte_size: usize,
    /// Distinguishes this entry from later writes to the same key
    pub(crate) generation: u64,
    pub(crate) timer: Option<AbortHandle>,
}

impl Envelope {
    pub(crate) fn new(key: &Key, payload: Payload, stored: u64, ttl: u64, generation: u64) -> Self {
        let byte_size =
            ENTRY_OVERHEAD_BYTES + payload.byte_len() + key.segment.len() + key.id.len();
        Self {
            payload,
            stored,
            ttl,
            byte_size,
            generation,
            timer: None,
        }
    }

    pub(crate) fn snapshot(&self) -> Result<Cached> {
        Ok(Cached {
            item: self.payload.decode()?,
            stored: self.stored,
            ttl: self.ttl,
        })
    }

    /// Cancels the pending expiry timer, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
