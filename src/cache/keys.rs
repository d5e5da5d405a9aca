//! Cache key definitions.
//!
//! A [`CacheKey`] is either a digest of a caller-supplied identifier or the
//! identifier itself. Only digest-shaped keys can travel through the
//! background trigger.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a hashed cache key, in characters.
pub const HASHED_KEY_LEN: usize = 32;

/// Namespace prepended to a cache key to form its refresh-lock key.
pub const LOCK_KEY_PREFIX: &str = "refresh_lock__";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest `raw` into a 32-character lowercase hex key.
    pub fn hashed(raw: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(raw.as_ref());
        Self(hex::encode(&digest[..HASHED_KEY_LEN / 2]))
    }

    /// Use `raw` verbatim.
    pub fn literal(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key of the refresh lock guarding this entry.
    pub fn lock_key(&self) -> String {
        format!("{LOCK_KEY_PREFIX}{}", self.0)
    }

    /// Whether the trigger server will accept this key.
    pub fn is_trigger_compatible(&self) -> bool {
        has_trigger_shape(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn has_trigger_shape(key: &str) -> bool {
    key.len() == HASHED_KEY_LEN
}
