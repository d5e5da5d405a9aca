use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use httpmock::MockServer;
use serde_json::json;
use softcache::cache::{
    CacheConfig, HandlerRegistry, ManualClock, MemoryStore, RefreshDispatcher, ScheduledRefresh,
    SoftExpiryCache,
};
use softcache::infra::http::{CACHE_STATUS_HEADER, HttpState, REQUEST_ID_HEADER, build_router};
use softcache::infra::upstream::{HTTP_GET_HANDLER, HttpGetHandler};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingDispatcher {
    dispatched: Mutex<Vec<ScheduledRefresh>>,
}

impl RefreshDispatcher for RecordingDispatcher {
    fn dispatch(&self, _cache: &SoftExpiryCache, refresh: ScheduledRefresh) {
        self.dispatched
            .lock()
            .expect("dispatcher lock")
            .push(refresh);
    }
}

struct App {
    router: Router,
    clock: Arc<ManualClock>,
    dispatcher: Arc<RecordingDispatcher>,
}

fn app() -> App {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = HandlerRegistry::new()
        .with_handler(HTTP_GET_HANDLER, HttpGetHandler::new().expect("handler"));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let cache = SoftExpiryCache::new(
        Arc::new(MemoryStore::with_clock(clock.clone())),
        registry,
        CacheConfig::default(),
        dispatcher.clone(),
    )
    .with_clock(clock.clone());

    App {
        router: build_router(HttpState::new(cache)),
        clock,
        dispatcher,
    }
}

async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn cached_uri(upstream: &str, extra: &str) -> String {
    let mut uri = url::Url::parse("http://localhost/cached").expect("url");
    uri.query_pairs_mut()
        .append_pair("url", upstream)
        .append_pair("suffix", "!")
        .append_pair("expires_in", "30");
    let query = uri.query().unwrap_or_default().to_string();
    format!("/cached?{query}{extra}")
}

#[tokio::test]
async fn health_answers_no_content() {
    let app = app();
    let response = send(&app.router, get("/_health")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn cached_requires_url() {
    let app = app();
    let response = send(&app.router, get("/cached")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = app();
    let first = send(&app.router, get("/_health")).await;
    let second = send(&app.router, get("/cached")).await;

    let first_id = first.headers()[REQUEST_ID_HEADER].to_str().expect("ascii id");
    let second_id = second.headers()[REQUEST_ID_HEADER].to_str().expect("ascii id");
    assert_eq!(first_id.len(), 36);
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn background_only_miss_is_accepted() {
    let upstream = MockServer::start_async().await;
    let mock = upstream
        .mock_async(|when, then| {
            when.method("GET").path("/feed");
            then.status(200).body("feed");
        })
        .await;
    let app = app();

    let uri = cached_uri(&upstream.url("/feed"), "&background_only=true");
    let response = send(&app.router, get(&uri)).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(mock.calls_async().await, 0);
    assert_eq!(app.dispatcher.dispatched.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn stale_value_is_served_then_refreshed_through_the_trigger_path() {
    let upstream = MockServer::start_async().await;
    let mock = upstream
        .mock_async(|when, then| {
            when.method("GET").path("/feed");
            then.status(200).body("feed");
        })
        .await;
    let app = app();
    let uri = cached_uri(&upstream.url("/feed"), "");

    let first = send(&app.router, get(&uri)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[CACHE_STATUS_HEADER], "fetched");
    assert_eq!(body_text(first).await, "feed!");

    app.clock.advance(Duration::from_secs(31));
    let stale = send(&app.router, get(&uri)).await;
    assert_eq!(stale.headers()[CACHE_STATUS_HEADER], "stale");
    assert_eq!(body_text(stale).await, "feed!");

    let refresh = app
        .dispatcher
        .dispatched
        .lock()
        .expect("lock")
        .pop()
        .expect("refresh dispatched after the request");
    let wake_up = Request::builder()
        .method(Method::POST)
        .uri("/_softcache/refresh")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"refresh_token": refresh.token, "key": refresh.key.as_str()}).to_string(),
        ))
        .expect("request should build");
    let response = send(&app.router, wake_up).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_text(response).await.is_empty());

    let fresh = send(&app.router, get(&uri)).await;
    assert_eq!(fresh.headers()[CACHE_STATUS_HEADER], "fresh");
    assert_eq!(mock.calls_async().await, 2);
}

#[tokio::test]
async fn forged_wake_up_is_answered_but_ignored() {
    let app = app();
    let wake_up = Request::builder()
        .method(Method::POST)
        .uri("/_softcache/refresh")
        .body(Body::from(
            json!({"refresh_token": "refresh_lock_forged", "key": "k".repeat(32)}).to_string(),
        ))
        .expect("request should build");

    let response = send(&app.router, wake_up).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn get_on_trigger_path_is_not_intercepted() {
    let app = app();
    let response = send(&app.router, get("/_softcache/refresh")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_expiration_is_rejected() {
    let app = app();
    for extra in ["", "&background_only=true"] {
        let uri = format!(
            "/cached?url=http%3A%2F%2F127.0.0.1%3A9%2Ffeed&expires_in=1000000000000{extra}"
        );
        let response = send(&app.router, get(&uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    assert!(app.dispatcher.dispatched.lock().expect("lock").is_empty());
}
