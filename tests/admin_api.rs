use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
    response::Response,
};
use cachegate::{
    cache::{CacheConfig, CacheStore, MemoryStore, StoreError, StoreStats},
    infra::http::{AdminState, InvalidateResponse, build_admin_router},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

struct UnreachableStore;

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::unavailable("no route to host"))
    }

    async fn set(&self, _: &str, _: &Value, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::unavailable("no route to host"))
    }

    async fn del(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::unavailable("no route to host"))
    }

    async fn del_pattern(&self, _: &str) -> Result<u64, StoreError> {
        Err(StoreError::unavailable("no route to host"))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(StoreError::unavailable("no route to host"))
    }
}

/// Every pattern delete takes `delay` to answer.
struct SlowStore {
    delay: Duration,
}

#[async_trait]
impl CacheStore for SlowStore {
    async fn get(&self, _: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _: &str, _: &Value, _: Duration) -> Result<(), StoreError> {
        Ok(())
    }

    async fn del(&self, _: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn del_pattern(&self, _: &str) -> Result<u64, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(1)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats::default())
    }
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for key in ["api:/users/1", "api:/users/1:page=2", "api:/users/2", "api:/posts"] {
        store
            .set(key, &json!({ "key": key }), Duration::from_secs(60))
            .await
            .expect("seed");
    }
    store
}

fn router(store: Arc<dyn CacheStore>) -> Router {
    build_admin_router(AdminState::new(store, CacheConfig::default()))
}

async fn request(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    app.oneshot(request).await.expect("router should respond")
}

async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn stats_report_formatted_fields() {
    let store = seeded_store().await;
    store.get("api:/posts").await.expect("get");
    store.get("api:/absent").await.expect("get");

    let response = request(router(store), Method::GET, "/_cache/stats", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["hits"], 1);
    assert_eq!(body["misses"], 1);
    assert_eq!(body["keys"], 4);
    assert_eq!(body["hitRatePercentage"], "50.00%");
    assert_eq!(body["memoryUsageMB"], "0.00 MB");
}

#[tokio::test]
async fn stats_propagate_store_failure() {
    let response = request(
        router(Arc::new(UnreachableStore)),
        Method::GET,
        "/_cache/stats",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn invalidate_deletes_matching_subtree() {
    let store = seeded_store().await;

    let response = request(
        router(store.clone()),
        Method::POST,
        "/_cache/invalidate",
        Some(json!({ "patterns": ["api:/users/1/*"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: InvalidateResponse =
        serde_json::from_value(json_body(response).await).expect("invalidate response");
    assert_eq!(body.removed, 2);
    assert!(!store.contains("api:/users/1"));
    assert!(!store.contains("api:/users/1:page=2"));
    assert!(store.contains("api:/users/2"));
    assert!(store.contains("api:/posts"));
}

#[tokio::test]
async fn invalidate_rejects_empty_pattern_list() {
    let response = request(
        router(seeded_store().await),
        Method::POST,
        "/_cache/invalidate",
        Some(json!({ "patterns": [] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalidate_surfaces_store_failure() {
    let response = request(
        router(Arc::new(UnreachableStore)),
        Method::POST,
        "/_cache/invalidate",
        Some(json!({ "patterns": ["api:/users*"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn invalidate_bounds_each_pattern_separately() {
    let config = CacheConfig {
        store_timeout_ms: 200,
        ..CacheConfig::default()
    };
    let store = Arc::new(SlowStore {
        delay: Duration::from_millis(50),
    });
    let app = build_admin_router(AdminState::new(store, config));

    let response = request(
        app,
        Method::POST,
        "/_cache/invalidate",
        Some(json!({ "patterns": ["api:/a*", "api:/b*", "api:/c*", "api:/d*", "api:/e*", "api:/f*"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: InvalidateResponse =
        serde_json::from_value(json_body(response).await).expect("invalidate response");
    assert_eq!(body.removed, 6);
}

#[tokio::test]
async fn health_reflects_store_reachability() {
    let healthy = request(router(seeded_store().await), Method::GET, "/_health", None).await;
    assert_eq!(healthy.status(), StatusCode::NO_CONTENT);

    let unhealthy = request(
        router(Arc::new(UnreachableStore)),
        Method::GET,
        "/_health",
        None,
    )
    .await;
    assert_eq!(unhealthy.status(), StatusCode::SERVICE_UNAVAILABLE);
}
