//! Write-path invalidation.
//!
//! After a successful `POST`/`PUT`/`PATCH`/`DELETE`, the route's patterns are
//! resolved against its path parameters and handed to the store's
//! delete-by-pattern primitive.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams, State},
    http::{Method, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig,
    keys::{expand_subtree, placeholders, resolve_pattern},
    store::{CacheStore, StoreError, bounded},
};

const METRIC_INVALIDATION_TOTAL: &str = "cachegate_invalidation_total";

/// Shared state for [`invalidate_writes`], one per mutating route.
#[derive(Clone)]
pub struct InvalidationState {
    pub config: CacheConfig,
    pub store: Arc<dyn CacheStore>,
    pub patterns: Arc<[String]>,
}

impl InvalidationState {
    pub fn new<I, S>(store: Arc<dyn CacheStore>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config: CacheConfig::default(),
            store,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Delete everything the configured patterns resolve to.
    ///
    /// Each glob is attempted even if an earlier one failed. Returns the
    /// number of failed deletes.
    pub async fn invalidate(&self, params: &HashMap<String, String>) -> usize {
        let timeout = self.config.store_timeout();
        let mut failures = 0;

        for pattern in self.patterns.iter() {
            let resolved = resolve_pattern(pattern, params);
            let unresolved = placeholders(&resolved);
            if !unresolved.is_empty() {
                warn!(
                    target = "cachegate::cache::invalidation",
                    pattern = %pattern,
                    unresolved = ?unresolved,
                    "invalidation pattern has placeholders without route parameters"
                );
            }

            for glob in expand_subtree(&resolved) {
                match bounded(timeout, self.store.del_pattern(&glob)).await {
                    Ok(removed) => {
                        debug!(pattern = %glob, removed, "invalidated cache entries");
                        counter!(METRIC_INVALIDATION_TOTAL, "outcome" => "ok").increment(1);
                    }
                    Err(err) => {
                        failures += 1;
                        warn!(
                            target = "cachegate::cache::invalidation",
                            pattern = %glob,
                            error = %err,
                            "cache invalidation failed"
                        );
                        counter!(METRIC_INVALIDATION_TOTAL, "outcome" => "error").increment(1);
                    }
                }
            }
        }

        failures
    }
}

/// Middleware invalidating cached reads after successful writes.
///
/// Must be attached with `route_layer` (or on a `MethodRouter`) so path
/// parameters are available. The handler's response is returned as-is
/// whatever the invalidation outcome.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn invalidate_writes(
    State(state): State<InvalidationState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let params = route_params(&mut parts).await;
    let response = next.run(Request::from_parts(parts, body)).await;

    if response.status().is_success() {
        state.invalidate(&params).await;
    }

    response
}

pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

async fn route_params(parts: &mut Parts) -> HashMap<String, String> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(_) => HashMap::new(),
    }
}

/// Invalidate `patterns` outside a request.
///
/// Runs sequentially and stops at the first failure, which is returned.
/// Placeholders are not resolved. Returns the number of deleted keys.
pub async fn invalidate_cache<S, P>(store: &S, patterns: &[P]) -> Result<u64, StoreError>
where
    S: CacheStore + ?Sized,
    P: AsRef<str>,
{
    let mut removed = 0;
    for pattern in patterns {
        for glob in expand_subtree(pattern.as_ref()) {
            removed += store.del_pattern(&glob).await?;
        }
    }
    Ok(removed)
}

/// A placeholder that the route it is bound to cannot resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternLint {
    pub pattern: String,
    pub placeholder: String,
}

/// Check invalidation patterns against an axum route template such as
/// `/users/{userId}/posts`.
pub fn lint_patterns<P: AsRef<str>>(route: &str, patterns: &[P]) -> Vec<PatternLint> {
    let defined: BTreeSet<&str> = route
        .split('/')
        .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
        .map(|name| name.trim_start_matches('*'))
        .collect();

    patterns
        .iter()
        .flat_map(|pattern| {
            let pattern = pattern.as_ref();
            placeholders(pattern)
                .into_iter()
                .filter(|name| !defined.contains(name))
                .map(move |name| PatternLint {
                    pattern: pattern.to_string(),
                    placeholder: name.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::{MemoryStore, StoreStats};

    /// Fails every pattern delete containing `fail`.
    struct SelectiveStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl CacheStore for SelectiveStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }

        async fn del(&self, key: &str) -> Result<(), StoreError> {
            self.inner.del(key).await
        }

        async fn del_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
            if pattern.contains("fail") {
                return Err(StoreError::unavailable("connection reset"));
            }
            self.inner.del_pattern(pattern).await
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            self.inner.stats().await
        }
    }

    #[test]
    fn mutating_methods() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::PUT));
        assert!(is_mutating(&Method::PATCH));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
    }

    #[tokio::test]
    async fn failing_pattern_does_not_stop_the_rest() {
        let store = Arc::new(SelectiveStore {
            inner: MemoryStore::new(),
        });
        store
            .set("api:/users/1", &json!(1), Duration::from_secs(60))
            .await
            .expect("set");

        let state = InvalidationState::new(
            store.clone() as Arc<dyn CacheStore>,
            ["api:/fail*", "api:/users/:userId/*"],
        );
        let params = HashMap::from([("userId".to_string(), "1".to_string())]);

        let failures = state.invalidate(&params).await;

        assert_eq!(failures, 1);
        assert!(!store.inner.contains("api:/users/1"));
    }

    #[tokio::test]
    async fn manual_invalidation_propagates_first_error() {
        let store = SelectiveStore {
            inner: MemoryStore::new(),
        };
        store
            .set("api:/after", &json!(1), Duration::from_secs(60))
            .await
            .expect("set");

        let result = invalidate_cache(&store, &["api:/fail*", "api:/after"]).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.inner.contains("api:/after"));
    }

    #[tokio::test]
    async fn manual_invalidation_counts_removed_keys() {
        let store = MemoryStore::new();
        for key in ["api:/patients", "api:/patients:page=2", "api:/other"] {
            store
                .set(key, &json!(key), Duration::from_secs(60))
                .await
                .expect("set");
        }

        let removed = invalidate_cache(&store, &["api:/patients*"])
            .await
            .expect("invalidates");

        assert_eq!(removed, 2);
        assert!(store.contains("api:/other"));
    }

    #[test]
    fn lint_reports_placeholders_missing_from_route() {
        let lints = lint_patterns(
            "/users/{userId}/posts",
            &["api:/users/:userId/*", "api:/orders/:orderId"],
        );
        assert_eq!(
            lints,
            vec![PatternLint {
                pattern: "api:/orders/:orderId".to_string(),
                placeholder: "orderId".to_string(),
            }]
        );
    }

    #[test]
    fn lint_accepts_wildcard_segments() {
        assert!(lint_patterns("/files/{*path}", &["api:/files/:path"]).is_empty());
    }
}
