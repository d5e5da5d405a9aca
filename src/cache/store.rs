//! Key/value storage with per-key TTL.
//!
//! The cache keeps both its entries and its refresh locks in a [`Store`]. All
//! coordination between overlapping requests happens through this trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use super::clock::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("stored value for `{key}` could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value for `{key}` could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Return the live value for `key`. Expired values are absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value`, replacing any previous one. `None` means no TTL.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<OffsetDateTime>,
}

/// In-process [`Store`] honouring TTLs against an injectable clock.
///
/// Expired slots are dropped lazily on read.
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keys of all live slots, sorted.
    pub fn live_keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|slot| !is_expired(slot.value(), now))
            .map(|slot| slot.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(slot: &Slot, now: OffsetDateTime) -> bool {
    slot.expires_at.is_some_and(|at| at <= now)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        match self.slots.get(key) {
            None => return Ok(None),
            Some(slot) if !is_expired(slot.value(), now) => {
                return Ok(Some(slot.value().value.clone()));
            }
            Some(_) => {}
        };
        self.slots.remove_if(key, |_, slot| is_expired(slot, now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = time::Duration::try_from(ttl).map_err(StoreError::backend)?;
                let deadline = self.clock.now().checked_add(ttl).ok_or_else(|| {
                    StoreError::backend(format!(
                        "ttl of {}s for `{key}` is out of range",
                        ttl.whole_seconds()
                    ))
                })?;
                Some(deadline)
            }
            None => None,
        };
        self.slots
            .insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }
}
