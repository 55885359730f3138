//! Bulk cache population.

use std::error::Error as StdError;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{
    StreamExt,
    future::{BoxFuture, FutureExt},
    stream,
};
use metrics::histogram;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    CacheConfig,
    keys::CacheKey,
    store::{CacheStore, StoreError, bounded},
};

const METRIC_WARM_MS: &str = "cachegate_warm_ms";

pub type BoxError = Box<dyn StdError + Send + Sync>;

type Fetch = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value, BoxError>> + Send>;

/// One key to pre-populate and the function producing its value.
pub struct WarmingTask {
    pub key: CacheKey,
    pub ttl: Option<Duration>,
    fetch: Fetch,
}

impl WarmingTask {
    pub fn new<F, Fut, E>(key: impl Into<CacheKey>, fetch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            key: key.into(),
            ttl: None,
            fetch: Box::new(move || fetch().map(|result| result.map_err(Into::into)).boxed()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl fmt::Debug for WarmingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingTask")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("failed to fetch value for `{key}`: {source}")]
    Fetch {
        key: CacheKey,
        #[source]
        source: BoxError,
    },
    #[error("failed to store value for `{key}`: {source}")]
    Store {
        key: CacheKey,
        #[source]
        source: StoreError,
    },
    #[error("warming task for `{key}` panicked")]
    Panicked { key: CacheKey },
}

/// Outcome of a warming run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WarmReport {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct CacheWarmer {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    timeout: Duration,
    concurrency: Option<usize>,
}

impl CacheWarmer {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            default_ttl: config.default_ttl(),
            timeout: config.store_timeout(),
            concurrency: config.warm_concurrency_non_zero().map(|limit| limit.get()),
        }
    }

    /// Run every task and wait for all of them to settle.
    ///
    /// Failures are logged and counted; they never abort the run.
    pub async fn warm(&self, tasks: Vec<WarmingTask>) -> WarmReport {
        let started = Instant::now();
        let total = tasks.len();
        let limit = self.concurrency.unwrap_or(total).max(1);

        let results: Vec<Result<(), WarmError>> = stream::iter(tasks)
            .map(|task| self.warm_isolated(task))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = WarmReport::default();
        for result in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target = "cachegate::cache::warmer",
                        error = %err,
                        "cache warming task failed"
                    );
                }
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_WARM_MS).record(elapsed_ms);
        info!(
            target = "cachegate::cache::warmer",
            tasks = total,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms,
            "cache warming finished"
        );

        report
    }

    /// A panicking fetch is counted as a failed task.
    async fn warm_isolated(&self, task: WarmingTask) -> Result<(), WarmError> {
        let key = task.key.clone();
        AssertUnwindSafe(self.warm_one(task))
            .catch_unwind()
            .await
            .unwrap_or(Err(WarmError::Panicked { key }))
    }

    async fn warm_one(&self, task: WarmingTask) -> Result<(), WarmError> {
        let WarmingTask { key, ttl, fetch } = task;

        let value = fetch().await.map_err(|source| WarmError::Fetch {
            key: key.clone(),
            source,
        })?;

        let ttl = ttl.unwrap_or(self.default_ttl).max(Duration::from_secs(1));
        bounded(self.timeout, self.store.set(key.as_str(), &value, ttl))
            .await
            .map_err(|source| WarmError::Store { key, source })
    }
}
