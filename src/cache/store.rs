//! Store boundary.
//!
//! The caching layer consumes a key-value service through [`CacheStore`]; it
//! never owns eviction or expiry. Adapters live in `memory` and `redis`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache payload could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache store command failed: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Counters reported by a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    /// Fraction of lookups that hit, in `[0, 1]`.
    pub hit_rate: f64,
    /// Bytes in use by the store.
    pub memory_usage: u64,
    pub keys: u64,
}

impl StoreStats {
    pub fn new(hits: u64, misses: u64, memory_usage: u64, keys: u64) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        Self {
            hits,
            misses,
            hit_rate,
            memory_usage,
            keys,
        }
    }
}

/// Key-value service holding cached JSON responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key matching a Redis-style glob. Returns the number of
    /// keys removed.
    async fn del_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Run a store call under `timeout`; an elapsed timer becomes
/// [`StoreError::Timeout`].
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}
