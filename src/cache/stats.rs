//! Operator-facing cache statistics.

use std::time::Duration;

use serde::Serialize;

use super::store::{CacheStore, StoreError, StoreStats, bounded};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Store counters plus their formatted presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    #[serde(flatten)]
    pub raw: StoreStats,
    /// Hit rate as a percentage, e.g. `"87.50%"`.
    pub hit_rate_percentage: String,
    /// Memory usage in mebibytes, e.g. `"12.34 MB"`.
    #[serde(rename = "memoryUsageMB")]
    pub memory_usage_mb: String,
}

impl From<StoreStats> for CacheStatistics {
    fn from(raw: StoreStats) -> Self {
        Self {
            hit_rate_percentage: format!("{:.2}%", raw.hit_rate * 100.0),
            memory_usage_mb: format!("{:.2} MB", raw.memory_usage as f64 / BYTES_PER_MB),
            raw,
        }
    }
}

/// Read the store's counters. Errors propagate to the caller.
pub async fn cache_statistics(
    store: &dyn CacheStore,
    timeout: Duration,
) -> Result<CacheStatistics, StoreError> {
    let raw = bounded(timeout, store.stats()).await?;
    Ok(raw.into())
}
