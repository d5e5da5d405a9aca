//! Receiving side of the background trigger.

use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::keys::{CacheKey, has_trigger_shape};
use super::lock::TOKEN_PREFIX;
use super::soft::{FetchOutcome, ReplayOutcome, SoftExpiryCache};

const METRIC_IGNORED: &str = "softcache_trigger_ignored_total";

/// A wake-up call as received. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl TriggerRequest {
    pub fn new(refresh_token: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            refresh_token: Some(refresh_token.into()),
            key: Some(key.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingToken,
    MissingKey,
    BadTokenPrefix,
    BadKeyShape,
    NotLocked,
    TokenMismatch,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MissingKey => "missing_key",
            Self::BadTokenPrefix => "bad_token_prefix",
            Self::BadKeyShape => "bad_key_shape",
            Self::NotLocked => "not_locked",
            Self::TokenMismatch => "token_mismatch",
        }
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    /// Validation failed; nothing was touched.
    Ignored(IgnoreReason),
    /// The refresh ran.
    Replayed(FetchOutcome),
    /// The refresh could not run (store or handler configuration failure).
    Failed,
}

/// Validates wake-up calls and redoes the refresh they point at.
#[derive(Clone)]
pub struct TriggerServer {
    cache: SoftExpiryCache,
}

impl TriggerServer {
    pub fn new(cache: SoftExpiryCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &SoftExpiryCache {
        &self.cache
    }

    pub async fn handle(&self, request: TriggerRequest) -> TriggerOutcome {
        let (token, key) = match validate(request) {
            Ok(valid) => valid,
            Err(reason) => return ignored(reason),
        };

        match self.cache.replay(&token, &key).await {
            ReplayOutcome::NotLocked => ignored(IgnoreReason::NotLocked),
            ReplayOutcome::TokenMismatch => ignored(IgnoreReason::TokenMismatch),
            ReplayOutcome::Finished(outcome) => {
                info!(key = %key, outcome = outcome.as_str(), "Triggered refresh finished");
                TriggerOutcome::Replayed(outcome)
            }
            ReplayOutcome::Failed(err) => {
                warn!(key = %key, error = %err, "Triggered refresh failed");
                TriggerOutcome::Failed
            }
        }
    }
}

fn validate(request: TriggerRequest) -> Result<(String, CacheKey), IgnoreReason> {
    let token = request.refresh_token.ok_or(IgnoreReason::MissingToken)?;
    let key = request.key.ok_or(IgnoreReason::MissingKey)?;
    if !token.starts_with(TOKEN_PREFIX) {
        return Err(IgnoreReason::BadTokenPrefix);
    }
    if !has_trigger_shape(&key) {
        return Err(IgnoreReason::BadKeyShape);
    }
    Ok((token, CacheKey::literal(key)))
}

fn ignored(reason: IgnoreReason) -> TriggerOutcome {
    counter!(METRIC_IGNORED, "reason" => reason.as_str()).increment(1);
    debug!(reason = reason.as_str(), "Trigger request ignored");
    TriggerOutcome::Ignored(reason)
}
