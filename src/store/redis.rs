//! Redis-backed store
//!
//! Uses a multiplexed `ConnectionManager`, which reconnects on its own and is
//! cheap to clone per call.

use super::CacheStore;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

/// [`CacheStore`] over a shared Redis instance
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::StoreUnavailable(format!("{}: {}", url, e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("{}: {}", url, e)))?;
        debug!("Connected to Redis store at {}", url);
        Ok(Self { connection })
    }

    /// Clone of the underlying connection, for sharing with the lock manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut con = self.connection.clone();
        con.get::<_, Option<String>>(key)
            .await
            .map_err(|e| CacheError::store("get", key, e.to_string()))
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        let mut con = self.connection.clone();
        con.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| CacheError::store("set", key, e.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut con = self.connection.clone();
        // PX needs at least one millisecond
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async::<()>(&mut con)
            .await
            .map_err(|e| CacheError::store("set_with_ttl", key, e.to_string()))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut con = self.connection.clone();
        let removed: i64 = con
            .del(key)
            .await
            .map_err(|e| CacheError::store("delete", key, e.to_string()))?;
        Ok(removed > 0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("CACHEGUARD_TEST_REDIS").unwrap_or_else(|_| "redis://127.0.0.1/".into())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn roundtrip_against_server() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        store
            .set_with_ttl("cacheguard:test", "v".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            store.get("cacheguard:test").await.unwrap().as_deref(),
            Some("v")
        );
        assert!(store.delete("cacheguard:test").await.unwrap());
    }

    #[tokio::test]
    async fn bad_url_is_unavailable() {
        let err = RedisStore::connect("not-a-url").await.err().unwrap();
        assert!(matches!(err, CacheError::StoreUnavailable(_)));
    }
}
