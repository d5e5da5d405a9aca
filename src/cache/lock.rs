//! Refresh locks.
//!
//! A lock is a [`LockEntry`] stored next to the cache entry it guards. Holding
//! the token is the only proof of ownership. The check-then-acquire sequence
//! is not atomic; the worst case is one duplicate refresh.

use std::sync::Arc;

use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use super::config::CacheConfig;
use super::entry::LockEntry;
use super::keys::CacheKey;
use super::store::{Store, StoreError};

/// Every lock token starts with this marker.
pub const TOKEN_PREFIX: &str = "refresh_lock_";

pub(crate) fn new_token() -> String {
    format!("{TOKEN_PREFIX}{}", Uuid::new_v4().simple())
}

pub(crate) fn tokens_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[derive(Clone)]
pub struct RefreshLock {
    store: Arc<dyn Store>,
    config: CacheConfig,
}

impl RefreshLock {
    pub fn new(store: Arc<dyn Store>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Write a fresh lock for `key` and return its token.
    ///
    /// The lock outlives the soft expiration by the configured margin so that
    /// a refresh that never completes eventually frees the key.
    pub async fn acquire(
        &self,
        key: &CacheKey,
        ttl_seconds: i64,
        handler: &str,
        params: &[Value],
    ) -> Result<String, StoreError> {
        let token = new_token();
        let entry = LockEntry {
            token: token.clone(),
            key: key.as_str().to_string(),
            ttl_seconds,
            handler: handler.to_string(),
            params: params.to_vec(),
        };
        let lock_key = key.lock_key();
        let value = serde_json::to_value(&entry).map_err(|source| StoreError::Encode {
            key: lock_key.clone(),
            source,
        })?;
        let lock_ttl = self.config.lock_ttl(ttl_seconds);
        self.store.set(&lock_key, value, Some(lock_ttl)).await?;

        debug!(
            key = %key,
            lock_ttl_secs = lock_ttl.as_secs(),
            handler,
            "Refresh lock acquired"
        );
        Ok(token)
    }

    /// The stored lock for `key`, if any.
    pub async fn current(&self, key: &CacheKey) -> Result<Option<LockEntry>, StoreError> {
        let lock_key = key.lock_key();
        let Some(value) = self.store.get(&lock_key).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: lock_key,
                source,
            })
    }

    pub async fn is_locked(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.store.get(&key.lock_key()).await?.is_some())
    }

    pub async fn owns(&self, token: &str, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self
            .current(key)
            .await?
            .is_some_and(|entry| tokens_match(token, &entry.token)))
    }

    pub async fn release(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.store.delete(&key.lock_key()).await?;
        debug!(key = %key, "Refresh lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn lock_with_clock() -> (RefreshLock, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (RefreshLock::new(store, CacheConfig::default()), clock)
    }

    #[tokio::test]
    async fn acquire_own_release_round_trip() {
        let (lock, _) = lock_with_clock();
        let key = CacheKey::literal("k".repeat(32));

        assert!(!lock.is_locked(&key).await.expect("check"));
        let token = lock
            .acquire(&key, 30, "fetch", &[json!("a")])
            .await
            .expect("acquire");
        assert!(token.starts_with(TOKEN_PREFIX));
        assert!(lock.is_locked(&key).await.expect("check"));
        assert!(lock.owns(&token, &key).await.expect("owns"));
        assert!(!lock.owns("refresh_lock_other", &key).await.expect("owns"));

        lock.release(&key).await.expect("release");
        assert!(!lock.is_locked(&key).await.expect("check"));
        assert!(!lock.owns(&token, &key).await.expect("owns"));
    }

    #[tokio::test]
    async fn lock_entry_carries_replay_information() {
        let (lock, _) = lock_with_clock();
        let key = CacheKey::hashed("feed");
        let token = lock
            .acquire(&key, 45, "http_get", &[json!("https://example.com"), json!("!")])
            .await
            .expect("acquire");

        let entry = lock.current(&key).await.expect("load").expect("present");
        assert_eq!(
            entry,
            LockEntry {
                token,
                key: key.as_str().to_string(),
                ttl_seconds: 45,
                handler: "http_get".to_string(),
                params: vec![json!("https://example.com"), json!("!")],
            }
        );
    }

    #[tokio::test]
    async fn stuck_lock_expires_after_expiration_plus_margin() {
        let (lock, clock) = lock_with_clock();
        let key = CacheKey::literal("stuck");
        lock.acquire(&key, 30, "fetch", &[]).await.expect("acquire");

        clock.advance(Duration::from_secs(329));
        assert!(lock.is_locked(&key).await.expect("check"));
        clock.advance(Duration::from_secs(1));
        assert!(!lock.is_locked(&key).await.expect("check"));
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let (lock, _) = lock_with_clock();
        let key = CacheKey::literal("k");
        let first = lock.acquire(&key, 1, "fetch", &[]).await.expect("acquire");
        let second = lock.acquire(&key, 1, "fetch", &[]).await.expect("acquire");
        assert_ne!(first, second);
        assert!(lock.owns(&second, &key).await.expect("owns"));
        assert!(!lock.owns(&first, &key).await.expect("owns"));
    }

    #[test]
    fn token_comparison_requires_exact_match() {
        assert!(tokens_match("refresh_lock_a", "refresh_lock_a"));
        assert!(!tokens_match("refresh_lock_a", "refresh_lock_ab"));
        assert!(!tokens_match("", "refresh_lock_a"));
    }
}
