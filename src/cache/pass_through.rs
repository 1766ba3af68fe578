//! Pass-through strategy: cache values and cache absence
//!
//! A miss for a key the source does not have is remembered for a short
//! window, so repeated lookups of nonexistent keys stop reaching the loader.
//! Concurrent misses on the same real key may each run the loader.

use super::CacheAccessor;
use crate::error::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

impl CacheAccessor {
    /// Get `key` from the store, or load it and cache the outcome
    ///
    /// A loaded value is cached for `ttl`; a loaded absence for the configured
    /// absence TTL. Loader errors are returned as-is. A failed cache write is
    /// logged and the loaded value is still returned.
    pub async fn query_pass_through<T, E, F, Fut>(
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
            debug!("Cache hit for {}", key);
            return Ok(cached.into_option());
        }

        debug!("Cache miss for {}, loading", key);
        let loaded = loader(key.to_string()).await?;
        self.write_loaded(key, &loaded, ttl, self.settings.absent_ttl)
            .await;
        Ok(loaded)
    }
}
