//! Configuration schema for cacheguard
//!
//! Configuration is stored at `~/.config/cacheguard/config.toml`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Shared store settings
    pub store: StoreConfig,

    /// Default lock timings
    pub lock: LockConfig,

    /// Mutex strategy settings
    pub mutex: MutexConfig,

    /// Rebuild worker pool
    pub rebuild: RebuildConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Which store and lock backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process store and locks, for a single instance or tests
    #[default]
    Memory,
    /// Shared Redis store and locks
    Redis,
}

/// Shared store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store and lock backend
    pub backend: Backend,

    /// Redis connection URL (backend = "redis")
    pub redis_url: String,

    /// How long a cached "not found" is kept, in seconds
    pub absent_ttl_secs: u64,

    /// Seconds between sweeps of expired keys and locks in the memory
    /// backend (0 = never sweep)
    pub purge_interval_secs: u64,
}

impl StoreConfig {
    /// TTL for absence markers
    pub fn absent_ttl(&self) -> Duration {
        Duration::from_secs(self.absent_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            absent_ttl_secs: 120,
            purge_interval_secs: 60,
        }
    }
}

/// Default lock timings for callers that do not pass their own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Time to wait for a lock, in milliseconds (0 = single attempt)
    pub wait_ms: u64,

    /// Lease before a lock expires on its own, in milliseconds
    pub lease_ms: u64,
}

impl LockConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_ms: 0,
            lease_ms: 10_000,
        }
    }
}

/// Mutex strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutexConfig {
    /// Pause between failed lock attempts, in milliseconds
    pub retry_backoff_ms: u64,

    /// Lock attempts before loading without the lock
    pub max_lock_attempts: u32,
}

impl MutexConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 50,
            max_lock_attempts: 200,
        }
    }
}

/// Rebuild worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Workers kept alive even when idle
    pub core_workers: usize,

    /// Upper bound on workers, including overflow workers
    pub max_workers: usize,

    /// Jobs buffered before overflow workers are started
    pub queue_capacity: usize,

    /// Idle time before an overflow worker exits, in seconds
    pub keep_alive_secs: u64,

    /// Prefix for worker names in logs
    pub worker_name_prefix: String,
}

impl RebuildConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Clamp to values the pool can run with: at least one core worker,
    /// max >= core, and a non-empty queue
    pub fn normalized(mut self) -> Self {
        self.core_workers = self.core_workers.max(1);
        self.max_workers = self.max_workers.max(self.core_workers);
        self.queue_capacity = self.queue_capacity.max(1);
        self
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            core_workers: 10,
            max_workers: 20,
            queue_capacity: 200,
            keep_alive_secs: 60,
            worker_name_prefix: "cache-rebuild-".to_string(),
        }
    }
}
