//! Redis lock manager
//!
//! A lock is a key holding the holder's token, created with `SET NX PX` so the
//! lease is enforced by the server. Release compares the token before
//! deleting, so an expired holder cannot drop a lock someone else now owns.

use super::{LockManager, LockToken};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Interval between acquisition attempts while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// [`LockManager`] over a shared Redis instance
#[derive(Clone)]
pub struct RedisLockManager {
    connection: ConnectionManager,
    release: redis::Script,
}

impl RedisLockManager {
    /// Build a lock manager on an existing connection
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            release: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    async fn attempt(&self, name: &str, lease: Duration) -> CacheResult<Option<LockToken>> {
        let token = LockToken::new(name, lease);
        let millis = lease.as_millis().clamp(1, u64::MAX as u128) as u64;
        let mut con = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token.holder.to_string())
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut con)
            .await
            .map_err(|e| CacheError::lock(name, e.to_string()))?;

        Ok(reply.map(|_| token))
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> CacheResult<Option<LockToken>> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(token) = self.attempt(name, lease).await? {
                trace!("Acquired lock {}", token);
                return Ok(Some(token));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn unlock(&self, token: &LockToken) -> CacheResult<bool> {
        let mut con = self.connection.clone();
        let removed: i64 = self
            .release
            .key(&token.name)
            .arg(token.holder.to_string())
            .invoke_async(&mut con)
            .await
            .map_err(|e| CacheError::lock(&token.name, e.to_string()))?;
        Ok(removed > 0)
    }

    async fn is_held(&self, token: &LockToken) -> CacheResult<bool> {
        let mut con = self.connection.clone();
        let current: Option<String> = redis::cmd("GET")
            .arg(&token.name)
            .query_async(&mut con)
            .await
            .map_err(|e| CacheError::lock(&token.name, e.to_string()))?;
        Ok(current.as_deref() == Some(token.holder.to_string().as_str()))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
