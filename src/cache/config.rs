//! Cache layer configuration.
//!
//! Populated from the `[cache]` section of `cachegate.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
pub(crate) const DEFAULT_TTL_SECS: u64 = 300;
pub(crate) const DEFAULT_STORE_TIMEOUT_MS: u64 = 1000;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Cache configuration shared by the read path, write path and warmer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and populate cached responses. Invalidation runs regardless.
    pub enabled: bool,
    /// TTL used by the warmer when a task does not carry its own.
    pub default_ttl_seconds: u64,
    /// Upper bound for every store call made by the layer.
    pub store_timeout_ms: u64,
    /// Largest response body buffered for write-back.
    pub max_body_bytes: usize,
    /// Maximum concurrent warming tasks; unset runs all at once.
    pub warm_concurrency: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_TTL_SECS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            warm_concurrency: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl_seconds: settings.default_ttl_seconds.get(),
            store_timeout_ms: settings.store_timeout.as_millis() as u64,
            max_body_bytes: settings.max_body_bytes.get(),
            warm_concurrency: settings.warm_concurrency.map(NonZeroUsize::get),
        }
    }
}

impl CacheConfig {
    /// Store call timeout, clamped to at least one millisecond.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    /// Default TTL, clamped to at least one second.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds.max(1))
    }

    /// Warm concurrency as NonZeroUsize; zero is treated as unset.
    pub fn warm_concurrency_non_zero(&self) -> Option<NonZeroUsize> {
        self.warm_concurrency.and_then(NonZeroUsize::new)
    }
}
