//! Values persisted in the store: cache entries and refresh-lock entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Soft expiry of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// Never goes stale.
    Never,
    At(#[serde(with = "time::serde::timestamp")] OffsetDateTime),
}

impl Expiry {
    /// Expiry for a value written at `now` with the given soft expiration.
    ///
    /// A deadline past the representable date range never arrives, so it is
    /// stored as [`Expiry::Never`].
    pub fn after(now: OffsetDateTime, expiration_seconds: i64) -> Self {
        if expiration_seconds <= 0 {
            return Self::Never;
        }
        now.checked_add(time::Duration::seconds(expiration_seconds))
            .map_or(Self::Never, Self::At)
    }

    pub fn is_stale_at(&self, now: OffsetDateTime) -> bool {
        match self {
            Self::Never => false,
            Self::At(at) => *at < now,
        }
    }
}

/// A cached payload together with its soft expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub expires_at: Expiry,
    pub payload: Value,
}

/// Everything needed to redo a refresh, stored next to the cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub token: String,
    pub key: String,
    /// Soft expiration the refresh re-applies when it writes the entry.
    pub ttl_seconds: i64,
    pub handler: String,
    pub params: Vec<Value>,
}
