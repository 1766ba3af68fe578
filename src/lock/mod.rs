//! Named, leased mutual exclusion shared across processes
//!
//! Ownership is identity-based: acquiring a lock hands back a [`LockToken`]
//! and only that token can release it. Any task holding the token may do so,
//! so ownership is not tied to the task that acquired it. A lock whose lease
//! runs out is free again whether or not it was released.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryLockManager;
#[cfg(feature = "redis")]
pub use self::redis::RedisLockManager;

use crate::error::CacheResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Proof of holding a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    /// Lock name
    pub name: String,

    /// Holder identity, unique per acquisition
    pub holder: Uuid,

    /// When the lock was granted
    pub acquired_at: DateTime<Utc>,

    /// Lease granted at acquisition
    pub lease: Duration,
}

impl LockToken {
    /// Mint a token for a fresh acquisition
    pub fn new(name: impl Into<String>, lease: Duration) -> Self {
        Self {
            name: name.into(),
            holder: Uuid::new_v4(),
            acquired_at: Utc::now(),
            lease,
        }
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.holder)
    }
}

/// Wait and lease durations for a single acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTiming {
    /// How long to keep trying before giving up (zero = single attempt)
    pub wait: Duration,

    /// How long the lock survives without an explicit release
    pub lease: Duration,
}

impl LockTiming {
    /// Create a timing pair
    pub fn new(wait: Duration, lease: Duration) -> Self {
        Self { wait, lease }
    }

    /// Single attempt with the given lease
    pub fn non_blocking(lease: Duration) -> Self {
        Self::new(Duration::ZERO, lease)
    }
}

/// Distributed lock manager
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take `name`, waiting up to `wait`; `None` if another holder has it
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> CacheResult<Option<LockToken>>;

    /// Release a lock held by `token`; `false` if it was no longer held by it
    async fn unlock(&self, token: &LockToken) -> CacheResult<bool>;

    /// Check whether `token` still holds its lock
    async fn is_held(&self, token: &LockToken) -> CacheResult<bool>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Lock name guarding the background rebuild of `key`
pub fn rebuild_lock_name(key: &str) -> String {
    format!("{}:lock", key)
}

/// Lock name guarding the synchronous load of `key`
pub fn mutex_lock_name(key: &str) -> String {
    format!("{}:mutex", key)
}
