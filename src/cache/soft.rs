//! Soft-expiry cache.
//!
//! Entries carry their own soft deadline. Past it the stale payload is still
//! served while a single background refresh, guarded by a [`RefreshLock`],
//! recomputes the value.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::dispatch::RefreshDispatcher;
use super::entry::{CacheEntry, Expiry};
use super::handler::{HandlerError, HandlerRegistry};
use super::keys::CacheKey;
use super::lock::{RefreshLock, tokens_match};
use super::options::{CacheOptions, RefreshMode};
use super::scope::{self, Claim, ScheduledRefresh};
use super::store::{Store, StoreError};

const METRIC_HIT: &str = "softcache_hit_total";
const METRIC_STALE: &str = "softcache_stale_total";
const METRIC_MISS: &str = "softcache_miss_total";
const METRIC_REFRESH: &str = "softcache_refresh_total";
const METRIC_FETCH_MS: &str = "softcache_fetch_ms";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no fetch handler configured for `{key}`")]
    MissingHandler { key: String },
    #[error("fetch handler `{handler}` for `{key}` is not registered")]
    UnknownHandler { key: String, handler: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`SoftExpiryCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Entry present and within its soft expiry.
    Fresh(Value),
    /// Entry past its soft expiry; a refresh has been scheduled if none was running.
    Stale(Value),
    /// Entry absent and computed inline.
    Fetched(Value),
    /// Nothing to serve yet.
    Unavailable,
}

impl Lookup {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Fresh(value) | Self::Stale(value) | Self::Fetched(value) => Some(value),
            Self::Unavailable => None,
        }
    }
}

/// Result of [`SoftExpiryCache::fetch_and_cache`].
#[derive(Debug)]
pub enum FetchOutcome {
    /// The handler succeeded and its value was written.
    Stored(Value),
    /// The handler failed; the previous entry is untouched.
    HandlerFailed(HandlerError),
    /// Another caller holds the refresh lock; nothing was done.
    LostRace,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored(_) => "stored",
            Self::HandlerFailed(_) => "handler_failed",
            Self::LostRace => "lost_race",
        }
    }
}

/// Result of [`SoftExpiryCache::schedule_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Lock acquired; dispatch waits for the end of the request scope.
    Deferred,
    /// Lock acquired and dispatched immediately (no request scope).
    Dispatched,
    /// This request already scheduled the key.
    AlreadyScheduled,
    /// Some other refresh holds the lock.
    AlreadyLocked,
    /// Nothing to refresh with.
    MissingHandler,
    /// The store could not be consulted or written.
    StoreFailed,
}

/// Result of [`SoftExpiryCache::replay`].
#[derive(Debug)]
pub enum ReplayOutcome {
    /// No lock is stored for the key.
    NotLocked,
    /// A lock is stored but under a different token.
    TokenMismatch,
    Finished(FetchOutcome),
    Failed(CacheError),
}

impl ReplayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLocked => "not_locked",
            Self::TokenMismatch => "token_mismatch",
            Self::Finished(outcome) => outcome.as_str(),
            Self::Failed(_) => "failed",
        }
    }
}

/// Cache handle. Cheap to clone; all clones share the same store.
#[derive(Clone)]
pub struct SoftExpiryCache {
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
    locks: RefreshLock,
    config: Arc<CacheConfig>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn RefreshDispatcher>,
}

impl SoftExpiryCache {
    pub fn new(
        store: Arc<dyn Store>,
        registry: HandlerRegistry,
        config: CacheConfig,
        dispatcher: Arc<dyn RefreshDispatcher>,
    ) -> Self {
        Self {
            locks: RefreshLock::new(store.clone(), config.clone()),
            store,
            registry: Arc::new(registry),
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            dispatcher,
        }
    }

    /// Replace the time source used for soft expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn locks(&self) -> &RefreshLock {
        &self.locks
    }

    /// Read the value described by `options`.
    ///
    /// Only blocks when the entry is absent in foreground mode. Errors never
    /// surface here: they degrade to [`Lookup::Unavailable`] or to the stale
    /// payload.
    pub async fn get(&self, options: &CacheOptions) -> Lookup {
        let key = options.key();
        let entry = match self.read_entry(key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = %key, error = %err, "Cache read failed, treating as absent");
                None
            }
        };

        let Some(entry) = entry else {
            return self.on_absent(options).await;
        };

        if entry.expires_at.is_stale_at(self.clock.now()) {
            counter!(METRIC_STALE).increment(1);
            let scheduled = self.schedule_refresh(options).await;
            debug!(key = %key, outcome = "stale", scheduled = ?scheduled, "Serving stale entry");
            Lookup::Stale(entry.payload)
        } else {
            counter!(METRIC_HIT).increment(1);
            debug!(key = %key, outcome = "hit", "Serving fresh entry");
            Lookup::Fresh(entry.payload)
        }
    }

    async fn on_absent(&self, options: &CacheOptions) -> Lookup {
        let key = options.key();
        match options.mode() {
            RefreshMode::BackgroundOnly => {
                counter!(METRIC_MISS, "mode" => "background_only").increment(1);
                let scheduled = self.schedule_refresh(options).await;
                debug!(key = %key, outcome = "miss", scheduled = ?scheduled, "Entry not yet available");
                Lookup::Unavailable
            }
            RefreshMode::Foreground => {
                counter!(METRIC_MISS, "mode" => "foreground").increment(1);
                debug!(key = %key, outcome = "miss", "Fetching entry inline");
                match self.fetch_and_cache(options).await {
                    Ok(FetchOutcome::Stored(value)) => Lookup::Fetched(value),
                    Ok(_) => Lookup::Unavailable,
                    Err(err) => {
                        warn!(key = %key, error = %err, "Inline fetch failed");
                        Lookup::Unavailable
                    }
                }
            }
        }
    }

    /// Run the handler and store its value.
    ///
    /// Fails without touching the lock when no usable handler is configured.
    /// Gives up silently when another caller holds the lock. Otherwise the
    /// lock is released afterwards whatever the handler returned.
    pub async fn fetch_and_cache(&self, options: &CacheOptions) -> Result<FetchOutcome, CacheError> {
        let key = options.key();
        let Some(handler_name) = options.handler() else {
            return Err(CacheError::MissingHandler {
                key: key.to_string(),
            });
        };
        let Some(handler) = self.registry.resolve(handler_name) else {
            return Err(CacheError::UnknownHandler {
                key: key.to_string(),
                handler: handler_name.to_string(),
            });
        };

        if let Some(lock) = self.locks.current(key).await? {
            let owned = options
                .lock_token()
                .is_some_and(|token| tokens_match(token, &lock.token));
            if !owned {
                debug!(key = %key, "Refresh lock held elsewhere, skipping fetch");
                counter!(METRIC_REFRESH, "outcome" => "lost_race").increment(1);
                return Ok(FetchOutcome::LostRace);
            }
        }

        let started_at = Instant::now();
        let fetched = handler.fetch(options.params()).await;
        histogram!(METRIC_FETCH_MS, "handler" => handler_name.to_string())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        let result = match fetched {
            Ok(payload) => self
                .set(options, payload.clone())
                .await
                .map(|()| FetchOutcome::Stored(payload))
                .map_err(CacheError::from),
            Err(err) => {
                warn!(key = %key, handler = handler_name, error = %err, "Fetch handler failed");
                Ok(FetchOutcome::HandlerFailed(err))
            }
        };

        if let Err(err) = self.locks.release(key).await {
            warn!(key = %key, error = %err, "Failed to release refresh lock");
        }

        match &result {
            Ok(outcome) => {
                counter!(METRIC_REFRESH, "outcome" => outcome.as_str()).increment(1);
                info!(
                    key = %key,
                    handler = handler_name,
                    outcome = outcome.as_str(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Cache refresh finished"
                );
            }
            Err(_) => counter!(METRIC_REFRESH, "outcome" => "store_failed").increment(1),
        }

        result
    }

    /// Write `payload` as the entry for `options`, stamping a fresh soft expiry.
    pub async fn set(&self, options: &CacheOptions, payload: Value) -> Result<(), StoreError> {
        let key = options.key();
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            expires_at: Expiry::after(self.clock.now(), self.expiration_for(options)),
            payload,
        };
        let value = serde_json::to_value(&entry).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store
            .set(key.as_str(), value, self.config.hard_ttl())
            .await
    }

    /// Arrange for the entry to be recomputed outside the current request.
    ///
    /// Repeated calls for one key inside a request scope collapse into the
    /// first. A key whose lock is already held is left alone.
    pub async fn schedule_refresh(&self, options: &CacheOptions) -> ScheduleOutcome {
        let key = options.key();
        if scope::claim(key) == Claim::Duplicate {
            return ScheduleOutcome::AlreadyScheduled;
        }
        let Some(handler) = options.handler() else {
            debug!(key = %key, "No handler configured, refresh not scheduled");
            return ScheduleOutcome::MissingHandler;
        };

        match self.locks.is_locked(key).await {
            Ok(true) => return ScheduleOutcome::AlreadyLocked,
            Ok(false) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "Could not check refresh lock");
                return ScheduleOutcome::StoreFailed;
            }
        }

        let token = match self
            .locks
            .acquire(key, self.expiration_for(options), handler, options.params())
            .await
        {
            Ok(token) => token,
            Err(err) => {
                warn!(key = %key, error = %err, "Could not acquire refresh lock");
                return ScheduleOutcome::StoreFailed;
            }
        };

        let refresh = ScheduledRefresh {
            token,
            key: key.clone(),
        };
        match scope::defer(refresh) {
            Ok(()) => ScheduleOutcome::Deferred,
            Err(refresh) => {
                self.dispatch(refresh);
                ScheduleOutcome::Dispatched
            }
        }
    }

    pub fn dispatch(&self, refresh: ScheduledRefresh) {
        self.dispatcher.dispatch(self, refresh);
    }

    pub fn dispatch_all(&self, refreshes: impl IntoIterator<Item = ScheduledRefresh>) {
        for refresh in refreshes {
            self.dispatch(refresh);
        }
    }

    /// Run `f` as one request: refreshes it schedules are deduplicated and
    /// dispatched once it has completed.
    pub async fn run_request<F, R>(&self, f: F) -> R
    where
        F: Future<Output = R>,
    {
        let (result, pending) = scope::with_refresh_scope(f).await;
        self.dispatch_all(pending);
        result
    }

    /// Redo the refresh recorded under `key`, provided `token` still owns it.
    pub async fn replay(&self, token: &str, key: &CacheKey) -> ReplayOutcome {
        let lock = match self.locks.current(key).await {
            Ok(Some(lock)) => lock,
            Ok(None) => return ReplayOutcome::NotLocked,
            Err(err) => return ReplayOutcome::Failed(err.into()),
        };
        if !tokens_match(token, &lock.token) {
            return ReplayOutcome::TokenMismatch;
        }

        let options = CacheOptions::new(key.clone())
            .with_expiration(lock.ttl_seconds)
            .with_handler(lock.handler, lock.params)
            .with_lock_token(token);
        match self.fetch_and_cache(&options).await {
            Ok(outcome) => ReplayOutcome::Finished(outcome),
            Err(err) => ReplayOutcome::Failed(err),
        }
    }

    fn expiration_for(&self, options: &CacheOptions) -> i64 {
        options
            .expiration_seconds()
            .unwrap_or(self.config.default_expiration_seconds)
    }

    async fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let Some(value) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            })
    }
}
