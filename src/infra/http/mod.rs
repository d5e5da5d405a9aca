mod middleware;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::cache::{
    CacheOptions, Lookup, MAX_EXPIRATION_SECS, SoftExpiryCache, TriggerServer, refresh_scope_layer,
    refresh_trigger_layer,
};
use crate::error::{AppError, ErrorReport};
use crate::infra::upstream::HTTP_GET_HANDLER;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

/// Response header naming how the value was served.
pub const CACHE_STATUS_HEADER: &str = "x-softcache";

#[derive(Clone)]
pub struct HttpState {
    pub cache: SoftExpiryCache,
    pub trigger: TriggerServer,
}

impl HttpState {
    pub fn new(cache: SoftExpiryCache) -> Self {
        Self {
            trigger: TriggerServer::new(cache.clone()),
            cache,
        }
    }
}

/// Build the public router.
///
/// The trigger layer sits outside everything else so that wake-up calls are
/// answered before logging, request context or the refresh scope.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/cached", get(cached))
        .route("/_health", get(health))
        .fallback(not_found)
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(
            state.cache.clone(),
            refresh_scope_layer,
        ))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .layer(axum_middleware::from_fn_with_state(
            state.trigger,
            refresh_trigger_layer,
        ))
}

#[derive(Debug, Deserialize)]
struct CachedQuery {
    url: Option<String>,
    suffix: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    background_only: bool,
}

impl CachedQuery {
    fn into_options(self) -> Result<CacheOptions, AppError> {
        let url = self
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AppError::validation("`url` is required"))?;

        let mut params = vec![Value::String(url)];
        if let Some(suffix) = self.suffix {
            params.push(Value::String(suffix));
        }
        let identity = json!([HTTP_GET_HANDLER, params]).to_string();

        let mut options = CacheOptions::hashed(identity).with_handler(HTTP_GET_HANDLER, params);
        if let Some(seconds) = self.expires_in {
            if seconds > MAX_EXPIRATION_SECS {
                return Err(AppError::validation(format!(
                    "`expires_in` must not exceed {MAX_EXPIRATION_SECS} seconds"
                )));
            }
            options = options.with_expiration(seconds);
        }
        if self.background_only {
            options = options.background_only();
        }
        Ok(options)
    }
}

async fn cached(
    State(state): State<HttpState>,
    Query(query): Query<CachedQuery>,
) -> Result<Response, AppError> {
    let background_only = query.background_only;
    let options = query.into_options()?;

    let lookup = state.cache.get(&options).await;
    let served = match &lookup {
        Lookup::Fresh(_) => "fresh",
        Lookup::Stale(_) => "stale",
        Lookup::Fetched(_) => "fetched",
        Lookup::Unavailable => "unavailable",
    };

    let mut response = match lookup.into_value() {
        Some(Value::String(body)) => body.into_response(),
        Some(value) => Json(value).into_response(),
        None if background_only => StatusCode::ACCEPTED.into_response(),
        None => {
            let mut response =
                (StatusCode::BAD_GATEWAY, "Value could not be computed").into_response();
            ErrorReport::from_message(
                "infra::http::cached",
                StatusCode::BAD_GATEWAY,
                format!("no value available for `{}`", options.key()),
            )
            .attach(&mut response);
            response
        }
    };
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(served));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
