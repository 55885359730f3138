//! Per-route cache policies.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::OriginalUri,
    http::{Uri, request::Parts},
};

use super::config::DEFAULT_TTL_SECS;
use super::keys::{CacheKey, default_key, scoped_key};

/// Derives the key for a request; receives the policy's excluded params.
pub type KeyGenerator = Arc<dyn Fn(&Parts, &BTreeSet<String>) -> CacheKey + Send + Sync>;

/// Decides whether a request is eligible for caching.
pub type Condition = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

/// Authenticated caller, inserted into request extensions by the
/// application's auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePrincipal {
    pub user_id: String,
}

impl CachePrincipal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn from_parts(parts: &Parts) -> Option<&Self> {
        parts.extensions.get::<Self>()
    }
}

/// How a route's `GET` responses are cached.
#[derive(Clone)]
pub struct CachePolicy {
    ttl: Duration,
    key_generator: Option<KeyGenerator>,
    condition: Option<Condition>,
    excluded_query: BTreeSet<String>,
}

impl CachePolicy {
    /// Policy with the default key generator and an always-true condition.
    /// A zero TTL is raised to one second.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.max(Duration::from_secs(1)),
            key_generator: None,
            condition: None,
            excluded_query: BTreeSet::new(),
        }
    }

    pub fn short() -> Self {
        Self::new(Duration::from_secs(300))
    }

    pub fn medium() -> Self {
        Self::new(Duration::from_secs(1800))
    }

    pub fn long() -> Self {
        Self::new(Duration::from_secs(3600))
    }

    pub fn very_long() -> Self {
        Self::new(Duration::from_secs(86_400))
    }

    /// Cache per authenticated principal; anonymous requests bypass.
    pub fn user_specific() -> Self {
        Self::short()
            .key_generator(|parts: &Parts, excluded: &BTreeSet<String>| {
                let scope = CachePrincipal::from_parts(parts).map(|p| p.user_id.as_str());
                scoped_key(request_uri(parts), excluded, scope)
            })
            .condition(|parts: &Parts| CachePrincipal::from_parts(parts).is_some())
    }

    /// Cache only anonymous requests.
    pub fn public_only() -> Self {
        Self::short().condition(|parts: &Parts| CachePrincipal::from_parts(parts).is_none())
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::from_secs(1));
        self
    }

    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Parts, &BTreeSet<String>) -> CacheKey + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Query parameters ignored when deriving keys.
    pub fn exclude_query<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_query.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn ttl_duration(&self) -> Duration {
        self.ttl
    }

    pub fn excluded_query(&self) -> &BTreeSet<String> {
        &self.excluded_query
    }

    pub fn applies_to(&self, parts: &Parts) -> bool {
        self.condition.as_ref().is_none_or(|condition| condition(parts))
    }

    pub fn key_for(&self, parts: &Parts) -> CacheKey {
        match &self.key_generator {
            Some(generator) => generator(parts, &self.excluded_query),
            None => default_key(request_uri(parts), &self.excluded_query),
        }
    }
}

/// The URI the client sent. Routers mounted with `nest` strip their prefix
/// from `parts.uri`, so prefer axum's [`OriginalUri`] when present.
pub fn request_uri(parts: &Parts) -> &Uri {
    parts
        .extensions
        .get::<OriginalUri>()
        .map_or(&parts.uri, |original| &original.0)
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

/// A bare number is a TTL in seconds.
impl From<u64> for CachePolicy {
    fn from(ttl_seconds: u64) -> Self {
        Self::new(Duration::from_secs(ttl_seconds))
    }
}

impl From<Duration> for CachePolicy {
    fn from(ttl: Duration) -> Self {
        Self::new(ttl)
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("custom_key_generator", &self.key_generator.is_some())
            .field("custom_condition", &self.condition.is_some())
            .field("excluded_query", &self.excluded_query)
            .finish()
    }
}
