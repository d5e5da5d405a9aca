//! Per-request refresh scope.
//!
//! Uses `tokio::task_local!` to remember which keys the current request has
//! already scheduled, and which refreshes still need dispatching once the
//! request is done. Outside a scope nothing is remembered and every scheduled
//! refresh is dispatched on the spot.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use super::keys::CacheKey;

tokio::task_local! {
    static SCOPE: Arc<Mutex<RefreshScope>>;
}

/// A refresh whose lock has been acquired and which awaits dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRefresh {
    pub token: String,
    pub key: CacheKey,
}

#[derive(Debug, Default)]
struct RefreshScope {
    claimed: HashSet<CacheKey>,
    pending: Vec<ScheduledRefresh>,
}

/// Result of claiming a key for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// First claim of this key in the active scope.
    Claimed,
    /// The active scope already scheduled this key.
    Duplicate,
    /// No scope is active.
    Unscoped,
}

/// A panic while the scope was held only loses dedup state, so the guard is
/// recovered rather than propagated.
fn lock_scope<'a>(
    scope: &'a Mutex<RefreshScope>,
    op: &'static str,
) -> MutexGuard<'a, RefreshScope> {
    scope.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_kind = "mutex.lock",
            result = "poisoned_recovered",
            hint = "scheduled refreshes may be missing after panic in another thread",
            "Recovered from poisoned refresh scope"
        );
        poisoned.into_inner()
    })
}

/// Claim `key` in the active scope.
pub(crate) fn claim(key: &CacheKey) -> Claim {
    SCOPE
        .try_with(|scope| {
            if lock_scope(scope, "claim").claimed.insert(key.clone()) {
                Claim::Claimed
            } else {
                Claim::Duplicate
            }
        })
        .unwrap_or(Claim::Unscoped)
}

/// Queue `refresh` for dispatch at the end of the active scope.
///
/// Hands the refresh back when no scope is active.
pub(crate) fn defer(refresh: ScheduledRefresh) -> Result<(), ScheduledRefresh> {
    let mut slot = Some(refresh);
    let _ = SCOPE.try_with(|scope| {
        if let Some(refresh) = slot.take() {
            lock_scope(scope, "defer").pending.push(refresh);
        }
    });
    match slot {
        Some(refresh) => Err(refresh),
        None => Ok(()),
    }
}

/// Run `f` inside a fresh refresh scope.
///
/// Returns the future's output together with the refreshes it scheduled, in
/// scheduling order.
pub async fn with_refresh_scope<F, R>(f: F) -> (R, Vec<ScheduledRefresh>)
where
    F: Future<Output = R>,
{
    let scope = Arc::new(Mutex::new(RefreshScope::default()));
    let result = SCOPE.scope(scope.clone(), f).await;
    let pending = std::mem::take(&mut lock_scope(&scope, "collect").pending);
    (result, pending)
}
