//! Fetch handlers backed by outbound HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

use crate::cache::{FetchHandler, HandlerError};

use super::error::InfraError;

pub const HTTP_GET_HANDLER: &str = "http_get";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// GETs the URL in `params[0]` and caches the body as a string.
///
/// An optional string in `params[1]` is appended to the body.
#[derive(Clone, Debug)]
pub struct HttpGetHandler {
    client: Client,
}

impl HttpGetHandler {
    pub fn new() -> Result<Self, InfraError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("softcache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchHandler for HttpGetHandler {
    async fn fetch(&self, params: &[Value]) -> Result<Value, HandlerError> {
        let url = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("expected a URL string as first parameter"))?;
        let url = Url::parse(url).map_err(|err| HandlerError::invalid_params(err.to_string()))?;
        let suffix = match params.get(1) {
            None | Some(Value::Null) => "",
            Some(Value::String(suffix)) => suffix.as_str(),
            Some(_) => {
                return Err(HandlerError::invalid_params(
                    "expected the second parameter to be a string",
                ));
            }
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(HandlerError::upstream)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::upstream(format!("{url} answered {status}")));
        }
        let mut body = response.text().await.map_err(HandlerError::upstream)?;
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Upstream fetched");

        body.push_str(suffix);
        Ok(Value::String(body))
    }
}
