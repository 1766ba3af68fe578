//! In-process store backed by a concurrent map
//!
//! Expiry runs on the tokio clock so that paused-time tests can step over a
//! TTL without sleeping.

use super::CacheStore;
use crate::error::CacheResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory [`CacheStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Check if the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL for a key, `None` if absent or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Drop every expired key, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("Purged {} expired keys", purged);
        }
        purged
    }

    /// Purge expired keys every `every` for as long as the store is alive
    ///
    /// Lazy expiry only reclaims keys that are read again; keys that are never
    /// looked up after they expire are left to this task.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        crate::sweep::spawn_sweeper(self, every, "store", Self::purge_expired)
    }

    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&self, key: &str, value: String, expires_at: Option<Instant>) {
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        // Expired entries are removed lazily on read
        let removed = self.entries.remove_if(key, |_, v| v.is_expired(now));
        if removed.is_some() {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        self.insert(key, value, None);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now().checked_add(ttl);
        self.insert(key, value, expires_at);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, v)| !v.is_expired(now)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
