//! Soft-expiry cache with out-of-band refresh.
//!
//! A value stays servable past its soft expiry while one background refresh
//! recomputes it:
//!
//! - [`SoftExpiryCache`] decides fresh, stale or absent and schedules refreshes
//! - [`RefreshLock`] keeps concurrent requests from refreshing the same key twice
//! - [`BackgroundTrigger`] and [`TriggerServer`] carry the refresh into a
//!   separate request of the same service
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_expiration_seconds = 300
//! lock_margin_seconds = 300
//! dispatch = "trigger"
//! trigger_path = "/_softcache/refresh"
//! # ... see config.rs for all options
//! ```

mod clock;
mod config;
mod dispatch;
mod entry;
mod handler;
mod keys;
mod lock;
mod middleware;
mod options;
mod scope;
mod server;
mod soft;
mod store;
mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DispatchMode, MAX_EXPIRATION_SECS};
pub use dispatch::{DeferredRefresh, RefreshDispatcher};
pub use entry::{CacheEntry, Expiry, LockEntry};
pub use handler::{FetchHandler, FnHandler, HandlerError, HandlerRegistry};
pub use keys::{CacheKey, HASHED_KEY_LEN, LOCK_KEY_PREFIX};
pub use lock::{RefreshLock, TOKEN_PREFIX};
pub use middleware::{refresh_scope_layer, refresh_trigger_layer};
pub use options::{CacheOptions, RefreshMode};
pub use scope::ScheduledRefresh;
pub use server::{IgnoreReason, TriggerOutcome, TriggerRequest, TriggerServer};
pub use soft::{CacheError, FetchOutcome, Lookup, ReplayOutcome, ScheduleOutcome, SoftExpiryCache};
pub use store::{MemoryStore, Store, StoreError};
pub use trigger::{BackgroundTrigger, TriggerError, TriggerPayload};
