//! Read-path response cache middleware.
//!
//! Serves cached JSON for eligible `GET` requests and writes successful
//! responses back to the store off the request's critical path.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig, CachePolicy,
    keys::CacheKey,
    store::{CacheStore, bounded},
};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

const METRIC_HIT_TOTAL: &str = "cachegate_response_hit_total";
const METRIC_MISS_TOTAL: &str = "cachegate_response_miss_total";
const METRIC_BYPASS_TOTAL: &str = "cachegate_response_bypass_total";
const METRIC_WRITE_FAILED_TOTAL: &str = "cachegate_store_write_failed_total";

/// Shared state for [`response_cache_layer`], one per cached route.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<dyn CacheStore>,
    pub policy: Arc<CachePolicy>,
}

impl CacheState {
    pub fn new(store: Arc<dyn CacheStore>, policy: impl Into<CachePolicy>) -> Self {
        Self {
            config: CacheConfig::default(),
            store,
            policy: Arc::new(policy.into()),
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }
}

/// Middleware for JSON response caching.
///
/// Only `GET` requests accepted by the policy condition are instrumented.
/// A hit answers from the store without running the handler. A miss runs
/// the handler and spawns the store write for 2xx JSON bodies. Store
/// failures degrade to an uncached pass-through.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET || !cache.config.enabled {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    if !cache.policy.applies_to(&parts) {
        return next.run(Request::from_parts(parts, body)).await;
    }

    let key = cache.policy.key_for(&parts);
    let request = Request::from_parts(parts, body);

    match bounded(cache.config.store_timeout(), cache.store.get(key.as_str())).await {
        Ok(Some(value)) => {
            debug!(cache = "response", outcome = "hit", key = %key, "serving cached response");
            counter!(METRIC_HIT_TOTAL).increment(1);
            return cached_response(value, &key);
        }
        Ok(None) => {
            debug!(cache = "response", outcome = "miss", key = %key, "cache miss, executing handler");
            counter!(METRIC_MISS_TOTAL).increment(1);
        }
        Err(err) => {
            warn!(
                target = "cachegate::cache::middleware",
                key = %key,
                error = %err,
                "cache lookup failed, serving uncached"
            );
            counter!(METRIC_BYPASS_TOTAL).increment(1);
            return next.run(request).await;
        }
    }

    let response = next.run(request).await;
    let mut response = if response.status().is_success() {
        write_back(&cache, &key, response).await
    } else {
        response
    };

    mark(response.headers_mut(), CacheOutcome::Miss, &key);
    response
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
        }
    }
}

fn mark(headers: &mut HeaderMap, outcome: CacheOutcome, key: &CacheKey) {
    headers.insert(X_CACHE, HeaderValue::from_static(outcome.as_str()));
    // Keys built from decoded query values may hold bytes a header cannot.
    match HeaderValue::from_str(key.as_str()) {
        Ok(value) => {
            headers.insert(X_CACHE_KEY, value);
        }
        Err(_) => debug!(key = %key, "cache key not representable as header value"),
    }
}

/// Build the short-circuit response for a hit.
fn cached_response(value: Value, key: &CacheKey) -> Response {
    let mut response = (StatusCode::OK, Json(value)).into_response();
    mark(response.headers_mut(), CacheOutcome::Hit, key);
    response
}

/// Write-back candidates carry a JSON content type and no declared length
/// over the limit. Anything else is returned without touching the body.
fn storable(headers: &HeaderMap, limit: usize) -> bool {
    let json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
        .is_some_and(|essence| essence == "application/json" || essence.ends_with("+json"));
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    json && declared.is_none_or(|length| length <= limit)
}

/// Buffer the handler's body up to the configured limit, hand a copy to a
/// detached store write and return the response unchanged.
///
/// A body that outgrows the limit while being read is served by replaying
/// the buffered prefix ahead of the remaining stream.
async fn write_back(cache: &CacheState, key: &CacheKey, response: Response) -> Response {
    let limit = cache.config.max_body_bytes;
    if !storable(response.headers(), limit) {
        debug!(key = %key, "response not eligible for write-back, not stored");
        return response;
    }

    let (parts, mut body) = response.into_parts();
    let mut buffered = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    target = "cachegate::cache::middleware",
                    key = %key,
                    error = %err,
                    "failed to buffer response body"
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        buffered.extend_from_slice(&data);

        if buffered.len() > limit {
            debug!(key = %key, size = buffered.len(), "response body over cache limit, not stored");
            let prefix = stream::once(async move { Ok::<_, axum::Error>(buffered.freeze()) });
            let body = Body::from_stream(prefix.chain(body.into_data_stream()));
            return Response::from_parts(parts, body);
        }
    }

    let bytes: Bytes = buffered.freeze();
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => spawn_store_write(cache, key.clone(), value),
        Err(_) => debug!(key = %key, "response body is not JSON, not stored"),
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn spawn_store_write(cache: &CacheState, key: CacheKey, value: Value) {
    let store = Arc::clone(&cache.store);
    let ttl = cache.policy.ttl_duration();
    let timeout = cache.config.store_timeout();

    tokio::spawn(async move {
        match bounded(timeout, store.set(key.as_str(), &value, ttl)).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "cached response stored"),
            Err(err) => {
                warn!(
                    target = "cachegate::cache::middleware",
                    key = %key,
                    error = %err,
                    "failed to store cached response"
                );
                counter!(METRIC_WRITE_FAILED_TOTAL).increment(1);
            }
        }
    });
}
