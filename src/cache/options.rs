//! Per-call cache options.

use serde_json::Value;

use super::keys::CacheKey;

/// What `get` does when the entry is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Compute the value inline.
    #[default]
    Foreground,
    /// Never compute inline; schedule a refresh and report the value unavailable.
    BackgroundOnly,
}

/// Immutable description of one cached value and how to recompute it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    key: CacheKey,
    expiration_seconds: Option<i64>,
    handler: Option<String>,
    params: Vec<Value>,
    mode: RefreshMode,
    lock_token: Option<String>,
}

impl CacheOptions {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            expiration_seconds: None,
            handler: None,
            params: Vec::new(),
            mode: RefreshMode::Foreground,
            lock_token: None,
        }
    }

    /// Options for a key derived by hashing `raw`.
    pub fn hashed(raw: impl AsRef<[u8]>) -> Self {
        Self::new(CacheKey::hashed(raw))
    }

    /// Options for a key used verbatim.
    pub fn literal(raw: impl Into<String>) -> Self {
        Self::new(CacheKey::literal(raw))
    }

    /// Soft expiration in seconds. Zero or less means the entry never goes stale.
    pub fn with_expiration(mut self, seconds: i64) -> Self {
        self.expiration_seconds = Some(seconds);
        self
    }

    /// Recompute the value with the named handler and these parameters.
    pub fn with_handler(mut self, handler: impl Into<String>, params: Vec<Value>) -> Self {
        self.handler = Some(handler.into());
        self.params = params;
        self
    }

    pub fn background_only(mut self) -> Self {
        self.mode = RefreshMode::BackgroundOnly;
        self
    }

    /// Present `token` as proof of owning the refresh lock.
    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn expiration_seconds(&self) -> Option<i64> {
        self.expiration_seconds
    }

    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    pub fn lock_token(&self) -> Option<&str> {
        self.lock_token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_foreground_without_handler() {
        let options = CacheOptions::literal("k");
        assert_eq!(options.mode(), RefreshMode::Foreground);
        assert_eq!(options.handler(), None);
        assert_eq!(options.expiration_seconds(), None);
        assert_eq!(options.lock_token(), None);
        assert!(options.params().is_empty());
    }

    #[test]
    fn builder_sets_every_field() {
        let options = CacheOptions::hashed("feed")
            .with_expiration(30)
            .with_handler("http_get", vec![json!("https://example.com")])
            .background_only()
            .with_lock_token("refresh_lock_abc");

        assert_eq!(options.key(), &CacheKey::hashed("feed"));
        assert_eq!(options.expiration_seconds(), Some(30));
        assert_eq!(options.handler(), Some("http_get"));
        assert_eq!(options.params(), &[json!("https://example.com")]);
        assert_eq!(options.mode(), RefreshMode::BackgroundOnly);
        assert_eq!(options.lock_token(), Some("refresh_lock_abc"));
    }
}
