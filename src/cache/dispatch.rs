//! Dispatch of scheduled refreshes.

use tracing::debug;

use super::scope::ScheduledRefresh;
use super::soft::SoftExpiryCache;

/// Gets a scheduled refresh running outside the request that scheduled it.
///
/// Implementations must not block: the refresh itself always happens on some
/// other task or in some other request.
pub trait RefreshDispatcher: Send + Sync {
    fn dispatch(&self, cache: &SoftExpiryCache, refresh: ScheduledRefresh);
}

/// Runs the refresh on a spawned task in this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredRefresh;

impl RefreshDispatcher for DeferredRefresh {
    fn dispatch(&self, cache: &SoftExpiryCache, refresh: ScheduledRefresh) {
        let cache = cache.clone();
        tokio::spawn(async move {
            let outcome = cache.replay(&refresh.token, &refresh.key).await;
            debug!(key = %refresh.key, outcome = outcome.as_str(), "Deferred refresh finished");
        });
    }
}
