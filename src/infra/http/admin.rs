//! Operations surface: statistics, manual invalidation and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    cache::{CacheConfig, CacheStore, StoreError, bounded, cache_statistics, invalidate_cache},
    error::HttpError,
};

use super::{
    middleware::{log_responses, set_request_context},
    store_health_response,
};

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn CacheStore>,
    pub config: CacheConfig,
}

impl AdminState {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidateResponse {
    pub removed: u64,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/_cache/stats", get(cache_stats))
        .route("/_cache/invalidate", post(invalidate))
        .route("/_health", get(health))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn cache_stats(State(state): State<AdminState>) -> Response {
    match cache_statistics(state.store.as_ref(), state.config.store_timeout()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn invalidate(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> Response {
    if request.patterns.is_empty() || request.patterns.iter().any(|p| p.trim().is_empty()) {
        return HttpError::new(
            "infra::http::admin::invalidate",
            StatusCode::BAD_REQUEST,
            "Invalid patterns",
            "patterns must be a non-empty list of non-empty strings",
        )
        .into_response();
    }

    match invalidate_each(&state, &request.patterns).await {
        Ok(removed) => {
            info!(
                target = "cachegate::http::admin",
                patterns = ?request.patterns,
                removed,
                "manual cache invalidation"
            );
            Json(InvalidateResponse { removed }).into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Each pattern gets its own store timeout.
async fn invalidate_each(state: &AdminState, patterns: &[String]) -> Result<u64, StoreError> {
    let mut removed = 0;
    for pattern in patterns {
        removed += bounded(
            state.config.store_timeout(),
            invalidate_cache(state.store.as_ref(), std::slice::from_ref(pattern)),
        )
        .await?;
    }
    Ok(removed)
}

async fn health(State(state): State<AdminState>) -> Response {
    let result = bounded(state.config.store_timeout(), state.store.stats()).await;
    store_health_response(result.map(|_| ()))
}
