//! Background trigger.
//!
//! Wakes the service up with a fire-and-forget POST to its own trigger path.
//! The triggered request redoes the refresh, so the request that scheduled it
//! never waits on the fetch.

use std::time::Duration;

use metrics::counter;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::dispatch::RefreshDispatcher;
use super::keys::CacheKey;
use super::scope::ScheduledRefresh;
use super::soft::SoftExpiryCache;

const METRIC_DISPATCH: &str = "softcache_trigger_dispatch_total";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid trigger url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build trigger client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Body of the wake-up call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub refresh_token: String,
    pub key: String,
}

#[derive(Clone, Debug)]
pub struct BackgroundTrigger {
    client: Client,
    endpoint: Url,
}

impl BackgroundTrigger {
    /// Build a trigger aimed at `base_url` joined with the configured path.
    pub fn new(config: &CacheConfig, base_url: &str) -> Result<Self, TriggerError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join(&config.trigger_path))
            .map_err(|source| TriggerError::InvalidUrl {
                url: base_url.to_string(),
                source,
            })?;
        Self::with_timeout(endpoint, config.trigger_timeout(), config.trigger_verify_tls)
    }

    pub fn with_timeout(
        endpoint: Url,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self, TriggerError> {
        let client = Client::builder()
            .user_agent(concat!("softcache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send the wake-up call in the background and return at once.
    ///
    /// The response and any transport failure are ignored.
    pub fn fire(&self, token: &str, key: &CacheKey) {
        if !key.is_trigger_compatible() {
            warn!(
                key = %key,
                "Key does not have the hashed shape; the trigger server will ignore it"
            );
        }
        counter!(METRIC_DISPATCH).increment(1);

        let trigger = self.clone();
        let payload = TriggerPayload {
            refresh_token: token.to_string(),
            key: key.as_str().to_string(),
        };
        tokio::spawn(async move {
            if let Err(err) = trigger.send(&payload).await {
                debug!(key = %payload.key, error = %err, "Trigger call did not complete");
            }
        });
    }

    /// Send the wake-up call and wait for the response status.
    pub async fn send(&self, payload: &TriggerPayload) -> Result<(), reqwest::Error> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await?;
        debug!(
            key = %payload.key,
            status = response.status().as_u16(),
            "Trigger call answered"
        );
        Ok(())
    }
}

impl RefreshDispatcher for BackgroundTrigger {
    fn dispatch(&self, _cache: &SoftExpiryCache, refresh: ScheduledRefresh) {
        self.fire(&refresh.token, &refresh.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    fn config() -> CacheConfig {
        CacheConfig {
            trigger_timeout_ms: 5_000,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let trigger = BackgroundTrigger::new(&config(), "http://127.0.0.1:8080").expect("trigger");
        assert_eq!(
            trigger.endpoint().as_str(),
            "http://127.0.0.1:8080/_softcache/refresh"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = BackgroundTrigger::new(&config(), "not a url").expect_err("invalid");
        assert!(matches!(err, TriggerError::InvalidUrl { .. }));
    }

    #[test]
    fn payload_wire_shape() {
        let payload = TriggerPayload {
            refresh_token: "refresh_lock_0123".to_string(),
            key: "k".repeat(32),
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        insta::assert_snapshot!(json, @r#"{"refresh_token":"refresh_lock_0123","key":"kkkkkkkkkkkkkkkkkkkkkkkkkkkkkkkk"}"#);
    }

    #[tokio::test]
    async fn send_posts_token_and_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/_softcache/refresh")
                    .json_body(serde_json::json!({
                        "refresh_token": "refresh_lock_abc",
                        "key": "0123456789abcdef0123456789abcdef",
                    }));
                then.status(204);
            })
            .await;

        let trigger = BackgroundTrigger::new(&config(), &server.base_url()).expect("trigger");
        trigger
            .send(&TriggerPayload {
                refresh_token: "refresh_lock_abc".to_string(),
                key: "0123456789abcdef0123456789abcdef".to_string(),
            })
            .await
            .expect("send");
        mock.assert_async().await;
    }

    async fn wait_for_calls(mock: &httpmock::Mock<'_>, expected: usize) -> usize {
        for _ in 0..250 {
            let calls = mock.calls_async().await;
            if calls >= expected {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        mock.calls_async().await
    }

    #[tokio::test]
    async fn fire_posts_in_the_background() {
        let server = MockServer::start_async().await;
        let key = CacheKey::hashed("feed");
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/_softcache/refresh")
                    .json_body(serde_json::json!({
                        "refresh_token": "refresh_lock_abc",
                        "key": key.as_str(),
                    }));
                then.status(204).delay(Duration::from_millis(500));
            })
            .await;
        let trigger = BackgroundTrigger::new(&config(), &server.base_url()).expect("trigger");

        let started = std::time::Instant::now();
        trigger.fire("refresh_lock_abc", &key);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(wait_for_calls(&mock, 1).await, 1);
    }

    #[tokio::test]
    async fn fire_still_posts_literal_keys() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/_softcache/refresh")
                    .json_body(serde_json::json!({
                        "refresh_token": "refresh_lock_abc",
                        "key": "short",
                    }));
                then.status(204);
            })
            .await;
        let trigger = BackgroundTrigger::new(&config(), &server.base_url()).expect("trigger");

        trigger.fire("refresh_lock_abc", &CacheKey::literal("short"));
        assert_eq!(wait_for_calls(&mock, 1).await, 1);
    }

    #[tokio::test]
    async fn fire_ignores_unreachable_endpoint() {
        // Nothing listens on port 9 on loopback; the spawned call just fails.
        let trigger = BackgroundTrigger::new(&config(), "http://127.0.0.1:9").expect("trigger");
        let started = std::time::Instant::now();
        trigger.fire("refresh_lock_abc", &CacheKey::hashed("feed"));
        assert!(started.elapsed() < Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
