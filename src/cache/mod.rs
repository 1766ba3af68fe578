//! Cache accessor: get-or-load over a shared store
//!
//! Three strategies trade availability against consistency:
//!
//! | Strategy | Protects against | On miss / stale |
//! |----------|------------------|-----------------|
//! | pass-through | penetration | load inline, cache value or absence |
//! | logical expiration | breakdown on hot keys | serve stale, rebuild in background |
//! | mutex | breakdown, strict freshness | one loader per key, others wait |
//!
//! Loaders are plain functions of the key. The accessor keeps no per-request
//! state; every coordination point is the store or the lock manager, plus an
//! in-process registry that lets same-process callers share a mutex load.

pub mod codec;
pub mod factory;
mod inflight;
mod logical;
mod mutex;
mod pass_through;
#[cfg(test)]
mod testing;

pub use codec::{CacheEntry, Cached};
pub use factory::create_accessor;
pub use logical::LogicalRead;

use crate::config::Config;
use crate::error::CacheResult;
use crate::lock::{LockManager, LockTiming, LockToken};
use crate::rebuild::RebuildScheduler;
use crate::store::CacheStore;
use inflight::InFlight;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables shared by all strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorSettings {
    /// TTL for cached absence in the pass-through strategy
    pub absent_ttl: Duration,

    /// Pause between failed mutex lock attempts
    pub retry_backoff: Duration,

    /// Mutex lock attempts before loading without the lock
    pub max_lock_attempts: u32,
}

impl AccessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            absent_ttl: config.store.absent_ttl(),
            retry_backoff: config.mutex.retry_backoff(),
            max_lock_attempts: config.mutex.max_lock_attempts,
        }
    }
}

impl Default for AccessorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Get-or-load front end over a shared store
pub struct CacheAccessor {
    store: Arc<dyn CacheStore>,
    locks: Arc<dyn LockManager>,
    scheduler: Arc<RebuildScheduler>,
    settings: AccessorSettings,
    in_flight: InFlight,
}

impl CacheAccessor {
    /// Assemble an accessor from its collaborators
    pub fn new(
        store: Arc<dyn CacheStore>,
        locks: Arc<dyn LockManager>,
        scheduler: Arc<RebuildScheduler>,
        settings: AccessorSettings,
    ) -> Self {
        Self {
            store,
            locks,
            scheduler,
            settings,
            in_flight: InFlight::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    pub fn scheduler(&self) -> &Arc<RebuildScheduler> {
        &self.scheduler
    }

    pub fn settings(&self) -> &AccessorSettings {
        &self.settings
    }

    /// Cache a value that the store drops after `ttl`
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let raw = codec::encode(&Cached::Present(value))?;
        self.store.set_with_ttl(key, raw, ttl).await
    }

    /// Record that the source has nothing for `key`, for `ttl`
    pub async fn set_absent(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let raw = codec::encode(&Cached::<()>::Absent)?;
        self.store.set_with_ttl(key, raw, ttl).await
    }

    /// Cache a value with no store TTL that turns stale after `logical_ttl`
    ///
    /// This is how a key is primed before the logical-expiration strategy can
    /// serve it.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        logical_ttl: Duration,
    ) -> CacheResult<()> {
        let raw = logical_payload(value, logical_ttl)?;
        self.store.set(key, raw).await
    }

    /// Drop `key` from the store
    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        let removed = self.store.delete(key).await?;
        debug!("Invalidated {} (existed: {})", key, removed);
        Ok(removed)
    }

    /// Read a TTL entry; a shape mismatch counts as a miss
    async fn read_cached<T>(&self, key: &str) -> CacheResult<Option<Cached<T>>>
    where
        T: DeserializeOwned,
    {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| codec::decode(key, &raw)))
    }

    /// Cache a fresh load; failures are logged and otherwise ignored
    async fn write_loaded<T: Serialize>(
        &self,
        key: &str,
        loaded: &Option<T>,
        value_ttl: Duration,
        absent_ttl: Duration,
    ) {
        let written = match loaded {
            Some(value) => self.set_with_ttl(key, value, value_ttl).await,
            None => self.set_absent(key, absent_ttl).await,
        };
        if let Err(e) = written {
            warn!("Failed to cache loaded value for {}: {}", key, e);
        }
    }

    /// Try the lock manager; its failures count as "not acquired"
    async fn acquire(&self, name: &str, timing: LockTiming) -> Option<LockToken> {
        match self.locks.try_lock(name, timing.wait, timing.lease).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Lock {} unavailable, treating as not acquired: {}", name, e);
                None
            }
        }
    }

    async fn release(&self, token: &LockToken) {
        match self.locks.unlock(token).await {
            Ok(true) => {}
            Ok(false) => debug!("Lock {} expired before release", token),
            Err(e) => warn!("Failed to release lock {}: {}", token, e),
        }
    }
}

/// Encode a logical entry expiring `logical_ttl` from now; entries are only
/// ever written whole
fn logical_payload<T: Serialize>(value: &T, logical_ttl: Duration) -> CacheResult<String> {
    codec::encode(&CacheEntry::expiring_in(value, logical_ttl))
}
