//! Axum integration.
//!
//! `refresh_trigger_layer` must be the outermost cache layer: it answers the
//! wake-up call before routing, authentication or the refresh scope run.
//! `refresh_scope_layer` wraps every other request in a refresh scope and
//! dispatches what it scheduled once the response is ready.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument, warn};

use super::server::{TriggerRequest, TriggerServer};
use super::soft::SoftExpiryCache;

const TRIGGER_BODY_LIMIT: usize = 4 * 1024;

/// Answers `POST <trigger_path>` with `204 No Content`; passes everything else on.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn refresh_trigger_layer(
    State(server): State<TriggerServer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_trigger = request.method() == Method::POST
        && request.uri().path() == server.cache().config().trigger_path;
    if !is_trigger {
        return next.run(request).await;
    }

    let trigger = match axum::body::to_bytes(request.into_body(), TRIGGER_BODY_LIMIT).await {
        Ok(bytes) => serde_json::from_slice::<TriggerRequest>(&bytes).unwrap_or_else(|err| {
            debug!(error = %err, "Unreadable trigger body");
            TriggerRequest::default()
        }),
        Err(err) => {
            debug!(error = %err, "Trigger body could not be collected");
            TriggerRequest::default()
        }
    };

    // The caller hangs up almost at once; the refresh must not be cancelled with it.
    let handled = tokio::spawn(async move { server.handle(trigger).await }).await;
    if let Err(err) = handled {
        warn!(error = %err, "Trigger handling task failed");
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Runs the request in a refresh scope.
pub async fn refresh_scope_layer(
    State(cache): State<SoftExpiryCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    cache.run_request(next.run(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::dispatch::DeferredRefresh;
    use crate::cache::handler::HandlerRegistry;
    use crate::cache::keys::CacheKey;
    use crate::cache::store::MemoryStore;
    use axum::{Router, middleware, routing::get};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, TriggerServer) {
        let cache = SoftExpiryCache::new(
            Arc::new(MemoryStore::new()),
            HandlerRegistry::new().with_fn("x", |_| Ok(json!("X"))),
            CacheConfig::default(),
            Arc::new(DeferredRefresh),
        );
        let server = TriggerServer::new(cache);
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                server.clone(),
                refresh_trigger_layer,
            ));
        (router, server)
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn trigger_path_answers_no_content_even_for_garbage() {
        let (router, _) = app();
        let response = router
            .oneshot(post("/_softcache/refresh", "not json"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn trigger_path_replays_locked_refresh() {
        let (router, server) = app();
        let key = CacheKey::literal("k".repeat(32));
        let token = server
            .cache()
            .locks()
            .acquire(&key, 30, "x", &[])
            .await
            .expect("acquire");

        let body = json!({"refresh_token": token, "key": key.as_str()}).to_string();
        let response = router
            .oneshot(post("/_softcache/refresh", &body))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!server.cache().locks().is_locked(&key).await.expect("check"));
    }

    #[tokio::test]
    async fn other_requests_pass_through() {
        let (router, _) = app();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
