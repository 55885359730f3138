//! Cachegate response cache.
//!
//! Caches JSON responses of `GET` endpoints and invalidates them when related
//! writes succeed:
//!
//! - **Read path**: [`response_cache_layer`] serves hits from the store and
//!   writes misses back in the background.
//! - **Write path**: [`invalidate_writes`] deletes key patterns after a
//!   successful `POST`/`PUT`/`PATCH`/`DELETE`.
//! - **Out of band**: [`CacheWarmer`] pre-populates keys and
//!   [`cache_statistics`] reports store counters.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 300
//! store_timeout_ms = 1000
//! max_body_bytes = 1048576
//! # warm_concurrency = 16
//! ```
//!
//! ## Wiring
//!
//! ```ignore
//! let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
//! let users = Router::new()
//!     .route("/users/{userId}", get(show_user))
//!     .route_layer(from_fn_with_state(
//!         CacheState::new(store.clone(), CachePolicy::medium()),
//!         response_cache_layer,
//!     ))
//!     .route(
//!         "/users/{userId}/posts",
//!         post(create_post).route_layer(from_fn_with_state(
//!             InvalidationState::new(store.clone(), ["api:/users/:userId/*"]),
//!             invalidate_writes,
//!         )),
//!     );
//! ```

mod config;
pub mod glob;
mod invalidation;
mod keys;
mod memory;
mod middleware;
mod policy;
mod redis;
mod stats;
mod store;
mod warmer;

pub use config::CacheConfig;
pub use invalidation::{
    InvalidationState, PatternLint, invalidate_cache, invalidate_writes, is_mutating,
    lint_patterns,
};
pub use keys::{
    CacheKey, KEY_PREFIX, canonical_query, decoded_path, default_key, expand_subtree,
    placeholders, resolve_pattern, scoped_key,
};
pub use memory::MemoryStore;
pub use middleware::{CacheOutcome, CacheState, X_CACHE, X_CACHE_KEY, response_cache_layer};
pub use policy::{CachePolicy, CachePrincipal, Condition, KeyGenerator, request_uri};
pub use self::redis::RedisStore;
pub use stats::{CacheStatistics, cache_statistics};
pub use store::{CacheStore, StoreError, StoreStats, bounded};
pub use warmer::{BoxError, CacheWarmer, WarmError, WarmReport, WarmingTask};
