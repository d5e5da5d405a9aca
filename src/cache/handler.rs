//! Named fetch handlers.
//!
//! Refresh locks record a handler by name so that any process holding the
//! same registry can redo a refresh scheduled elsewhere.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid handler parameters: {0}")]
    InvalidParams(String),
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn upstream(err: impl fmt::Display) -> Self {
        Self::Upstream(err.to_string())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Computes the value a cache entry holds.
#[async_trait]
pub trait FetchHandler: Send + Sync {
    async fn fetch(&self, params: &[Value]) -> Result<Value, HandlerError>;
}

/// Adapts a synchronous closure into a [`FetchHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> FetchHandler for FnHandler<F>
where
    F: Fn(&[Value]) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn fetch(&self, params: &[Value]) -> Result<Value, HandlerError> {
        (self.0)(params)
    }
}

/// Immutable name → handler table, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn FetchHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler under `name`, replacing any previous one.
    pub fn with_handler(
        mut self,
        name: impl Into<String>,
        handler: impl FetchHandler + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn with_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.with_handler(name, FnHandler(f))
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn FetchHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_registered_handlers() {
        let registry = HandlerRegistry::new()
            .with_fn("echo", |params| Ok(Value::Array(params.to_vec())))
            .with_fn("fail", |_| Err(HandlerError::other("boom")));

        assert!(registry.resolve("missing").is_none());

        let echo = registry.resolve("echo").expect("echo registered");
        let value = echo.fetch(&[json!(1), json!("a")]).await.expect("echo succeeds");
        assert_eq!(value, json!([1, "a"]));

        let fail = registry.resolve("fail").expect("fail registered");
        assert!(fail.fetch(&[]).await.is_err());
    }

    #[tokio::test]
    async fn later_registration_replaces_earlier() {
        let registry = HandlerRegistry::new()
            .with_fn("h", |_| Ok(json!(1)))
            .with_fn("h", |_| Ok(json!(2)));
        let handler = registry.resolve("h").expect("h registered");
        assert_eq!(handler.fetch(&[]).await.expect("h succeeds"), json!(2));
        assert_eq!(format!("{registry:?}"), r#"HandlerRegistry { handlers: ["h"] }"#);
    }

    #[test]
    fn debug_lists_sorted_names() {
        let registry = HandlerRegistry::new()
            .with_fn("b", |_| Ok(json!(null)))
            .with_fn("a", |_| Ok(json!(null)));
        assert_eq!(
            format!("{registry:?}"),
            r#"HandlerRegistry { handlers: ["a", "b"] }"#
        );
    }
}
