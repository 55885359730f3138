//! Networked store backed by a Redis connection pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use redis::{AsyncCommands, RedisError};
use serde_json::Value;
use tracing::debug;

use super::store::{CacheStore, StoreError, StoreStats};

/// Keys deleted per `DEL` round trip during pattern deletes.
const DELETE_BATCH: usize = 500;

impl From<RedisError> for StoreError {
    fn from(error: RedisError) -> Self {
        StoreError::backend(error.to_string())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool for `url` with at most `pool_size` connections.
    ///
    /// Connections are established lazily, so an unreachable server surfaces
    /// on the first call rather than here.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let mut config = Config::from_url(url);
        config.pool = Some(PoolConfig::new(pool_size));
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| StoreError::unavailable(format!("failed to create redis pool: {err}")))?;
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|err| StoreError::unavailable(err.to_string()))
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(key).await?;
        Ok(raw.map(|payload| serde_json::from_str(&payload)).transpose()?)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, payload, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            let count: u64 = conn.del(batch.to_vec()).await?;
            removed += count;
        }

        debug!(pattern, removed, "redis pattern delete");
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut conn = self.connection().await?;
        let info: String = redis::cmd("INFO").query_async(&mut conn).await?;
        let keys: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(parse_info(&info, keys))
    }
}

/// Extract keyspace counters and memory usage from an `INFO` reply.
fn parse_info(info: &str, keys: u64) -> StoreStats {
    let mut hits = 0;
    let mut misses = 0;
    let mut memory = 0;

    for line in info.lines() {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let parsed = value.trim().parse::<u64>().ok();
        match (name, parsed) {
            ("keyspace_hits", Some(value)) => hits = value,
            ("keyspace_misses", Some(value)) => misses = value,
            ("used_memory", Some(value)) => memory = value,
            _ => {}
        }
    }

    StoreStats::new(hits, misses, memory, keys)
}
