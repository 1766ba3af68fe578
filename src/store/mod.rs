//! Shared cache store abstraction
//!
//! The store is shared by every process that fronts the same source of truth.
//! Values are opaque strings; typing happens at the codec layer.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value store with optional per-key TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a raw value, `None` if the key is not present
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write a value with no expiry
    async fn set(&self, key: &str, value: String) -> CacheResult<()>;

    /// Write a value that the store drops after `ttl`
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}
