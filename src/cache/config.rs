//! Cache configuration.
//!
//! Controls soft-expiry defaults, refresh-lock lifetimes and how scheduled
//! refreshes are dispatched. Loaded from the `[cache]` table of `softcache.toml`.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
pub(crate) const DEFAULT_EXPIRATION_SECS: i64 = 300;
const DEFAULT_LOCK_MARGIN_SECS: u64 = 300;
const DEFAULT_TRIGGER_PATH: &str = "/_softcache/refresh";
const DEFAULT_TRIGGER_TIMEOUT_MS: u64 = 10;

/// Longest expiration, lock margin or hard TTL accepted from callers and
/// configuration (ten years).
pub const MAX_EXPIRATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// How a scheduled refresh leaves the request that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Fire a wake-up request at the process's own trigger endpoint.
    #[default]
    Trigger,
    /// Run the refresh on a spawned task once the current request completes.
    Deferred,
}

/// Cache configuration from `softcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Soft expiration applied when a call sets none.
    pub default_expiration_seconds: i64,
    /// Added to the soft expiration to obtain the refresh-lock TTL.
    pub lock_margin_seconds: u64,
    /// Hard TTL handed to the store for cache entries. `None` keeps entries
    /// until they are overwritten.
    pub hard_ttl_seconds: Option<u64>,
    /// Dispatch strategy for scheduled refreshes.
    pub dispatch: DispatchMode,
    /// Base URL the trigger is posted to. Derived from the listener address
    /// when absent.
    pub trigger_url: Option<String>,
    /// Path the trigger endpoint is mounted on.
    pub trigger_path: String,
    /// Timeout for the outbound trigger call.
    pub trigger_timeout_ms: u64,
    /// Verify TLS certificates on the outbound trigger call.
    pub trigger_verify_tls: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiration_seconds: DEFAULT_EXPIRATION_SECS,
            lock_margin_seconds: DEFAULT_LOCK_MARGIN_SECS,
            hard_ttl_seconds: None,
            dispatch: DispatchMode::default(),
            trigger_url: None,
            trigger_path: DEFAULT_TRIGGER_PATH.to_string(),
            trigger_timeout_ms: DEFAULT_TRIGGER_TIMEOUT_MS,
            trigger_verify_tls: true,
        }
    }
}

impl CacheConfig {
    /// TTL of the refresh lock guarding a value with the given soft expiration.
    ///
    /// Non-positive expirations contribute nothing; the margin alone applies.
    pub fn lock_ttl(&self, expiration_seconds: i64) -> Duration {
        let base = u64::try_from(expiration_seconds).unwrap_or(0);
        Duration::from_secs(base.saturating_add(self.lock_margin_seconds))
    }

    /// Hard TTL for cache entries, if any.
    pub fn hard_ttl(&self) -> Option<Duration> {
        self.hard_ttl_seconds.map(Duration::from_secs)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger_timeout_ms)
    }
}
