use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use cachegate::cache::{
    CacheConfig, CacheState, CacheStore, CacheWarmer, InvalidationState, MemoryStore, StoreError,
    StoreStats, WarmingTask, invalidate_writes, response_cache_layer,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::{Value, json};
use serial_test::serial;
use tower::ServiceExt;

/// Reads always miss and writes always fail.
struct ReadOnlyStore;

#[async_trait]
impl CacheStore for ReadOnlyStore {
    async fn get(&self, _: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _: &str, _: &Value, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::backend("READONLY You can't write against a read only replica."))
    }

    async fn del(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::backend("READONLY"))
    }

    async fn del_pattern(&self, _: &str) -> Result<u64, StoreError> {
        Err(StoreError::backend("READONLY"))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats::default())
    }
}

/// Every lookup fails.
struct DownStore;

#[async_trait]
impl CacheStore for DownStore {
    async fn get(&self, _: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn set(&self, _: &str, _: &Value, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn del(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn del_pattern(&self, _: &str) -> Result<u64, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
}

fn cached_router(store: Arc<dyn CacheStore>) -> Router {
    let cache = CacheState::new(store.clone(), 60u64);
    let invalidation = InvalidationState::new(store, ["api:/items/:id/*"]);

    Router::new()
        .route(
            "/items/{id}",
            get(|| async { Json(json!({ "ok": true })) })
                .route_layer(from_fn_with_state(cache, response_cache_layer)),
        )
        .route(
            "/items/{id}/touch",
            post(|| async { StatusCode::NO_CONTENT })
                .route_layer(from_fn_with_state(invalidation, invalidate_writes)),
        )
}

async fn call(app: &Router, method: Method, uri: &str) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    assert!(response.status().is_success());
}

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Hit, miss and successful invalidation.
    let memory = Arc::new(MemoryStore::new());
    let app = cached_router(memory.clone());
    call(&app, Method::GET, "/items/1").await;
    for _ in 0..100 {
        if memory.contains("api:/items/1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    call(&app, Method::GET, "/items/1").await;
    call(&app, Method::POST, "/items/1/touch").await;

    // Failed write-back and failed invalidation.
    let read_only = cached_router(Arc::new(ReadOnlyStore));
    call(&read_only, Method::GET, "/items/2").await;
    call(&read_only, Method::POST, "/items/2/touch").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Fail-open lookup.
    let down = cached_router(Arc::new(DownStore));
    call(&down, Method::GET, "/items/3").await;

    // Warm run.
    let warmer = CacheWarmer::new(memory.clone(), &CacheConfig::default());
    let report = warmer
        .warm(vec![WarmingTask::new("api:/items/4", || async {
            Ok::<_, std::io::Error>(json!({ "id": 4 }))
        })])
        .await;
    assert_eq!(report.succeeded, 1);

    let snapshot = snapshotter.snapshot().into_vec();

    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "cachegate_response_hit_total",
        "cachegate_response_miss_total",
        "cachegate_response_bypass_total",
        "cachegate_store_write_failed_total",
        "cachegate_invalidation_total",
        "cachegate_warm_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let invalidation_outcomes: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| {
            composite_key.key().name() == "cachegate_invalidation_total"
        })
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "outcome")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(invalidation_outcomes.contains("ok"));
    assert!(invalidation_outcomes.contains("error"));

    let hits = snapshot.iter().find_map(|(composite_key, _, _, value)| {
        match (composite_key.key().name(), value) {
            ("cachegate_response_hit_total", DebugValue::Counter(count)) => Some(*count),
            _ => None,
        }
    });
    assert_eq!(hits, Some(1));
}
