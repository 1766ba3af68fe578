//! Mutex strategy: one loader per key, everyone else waits for its result
//!
//! Callers in the same process queue behind an in-flight registry; callers in
//! other processes poll the distributed lock. Whoever holds the lock re-reads
//! the store before loading, so a waiter that wins the lock after the value
//! landed never reaches the source.

use super::inflight::{wait_for_leader, Claim};
use super::CacheAccessor;
use crate::error::CacheError;
use crate::lock::{mutex_lock_name, LockManager, LockTiming, LockToken};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A held mutex lock that is released even if the load never completes
///
/// The normal path releases inline through [`HeldLock::release`]. If the
/// caller's future is dropped or the loader panics, `Drop` hands the release
/// to a spawned task instead of leaving the lock to its lease.
struct HeldLock {
    locks: Arc<dyn LockManager>,
    token: Option<LockToken>,
}

impl HeldLock {
    fn new(locks: Arc<dyn LockManager>, token: LockToken) -> Self {
        Self {
            locks,
            token: Some(token),
        }
    }

    async fn release(mut self, accessor: &CacheAccessor) {
        if let Some(token) = self.token.take() {
            accessor.release(&token).await;
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to release lock {}, leaving it to its lease", token);
            return;
        };

        debug!("Load abandoned, releasing lock {}", token);
        let locks = Arc::clone(&self.locks);
        runtime.spawn(async move {
            if let Err(e) = locks.unlock(&token).await {
                warn!("Failed to release abandoned lock {}: {}", token, e);
            }
        });
    }
}

impl CacheAccessor {
    /// Get `key`, loading it under a per-key lock when missing
    ///
    /// Values and absences are both cached for `ttl`. When the lock cannot be
    /// obtained after the configured number of attempts the caller loads
    /// without it rather than waiting forever.
    pub async fn query_mutex<T, E, F, Fut>(
        &self,
        key: &str,
        timing: LockTiming,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let _leader = loop {
            if let Some(cached) = self.read_cached::<T>(key).await? {
                return Ok(cached.into_option());
            }
            match self.in_flight.claim(key) {
                Claim::Leader(guard) => break guard,
                Claim::Follower(done) => {
                    debug!("Load of {} in flight in this process, waiting", key);
                    wait_for_leader(done).await;
                }
            }
        };

        self.load_exclusive(key, timing, ttl, loader).await
    }

    async fn load_exclusive<T, E, F, Fut>(
        &self,
        key: &str,
        timing: LockTiming,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let lock_name = mutex_lock_name(key);
        let mut attempts = 0u32;
        let held = loop {
            if let Some(token) = self.acquire(&lock_name, timing).await {
                break Some(HeldLock::new(Arc::clone(&self.locks), token));
            }
            attempts += 1;
            if attempts >= self.settings.max_lock_attempts {
                warn!(
                    "Gave up on lock {} after {} attempts, loading without it",
                    lock_name, attempts
                );
                break None;
            }
            tokio::time::sleep(self.settings.retry_backoff).await;
            if let Some(cached) = self.read_cached::<T>(key).await? {
                return Ok(cached.into_option());
            }
        };

        let result = self.load_and_store(key, ttl, loader).await;
        if let Some(held) = held {
            held.release(self).await;
        }
        result
    }

    async fn load_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(cached) = self.read_cached::<T>(key).await? {
            debug!("{} filled while waiting for the lock", key);
            return Ok(cached.into_option());
        }

        let loaded = loader(key.to_string()).await?;
        self.write_loaded(key, &loaded, ttl, ttl).await;
        Ok(loaded)
    }
}
