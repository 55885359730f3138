//! In-process store backed by `DashMap`.
//!
//! Entries expire lazily: an expired entry is dropped the next time it is
//! read, matched by a pattern delete, or when stats are collected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::glob::glob_match;
use super::store::{CacheStore, StoreError, StoreStats};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
    /// Key plus serialized value length, used for memory accounting.
    size: usize,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a live entry exists, without touching hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        // The shard guard must be released before removing.
        let (found, expired) = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);

        Ok(found)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError> {
        let size = key.len() + serde_json::to_vec(value)?.len();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
                size,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in matched {
            let live = self
                .entries
                .remove(&key)
                .is_some_and(|(_, entry)| !entry.is_expired());
            if live {
                removed += 1;
            }
        }

        debug!(pattern, removed, "memory store pattern delete");
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.purge_expired();
        let memory: usize = self.entries.iter().map(|entry| entry.size).sum();

        Ok(StoreStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            memory as u64,
            self.entries.len() as u64,
        ))
    }
}
