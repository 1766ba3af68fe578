//! Accessor factory: wires a store, a lock manager and a rebuild pool from config

use super::{AccessorSettings, CacheAccessor};
use crate::config::schema::Backend;
use crate::config::Config;
use crate::error::CacheResult;
use crate::lock::{LockManager, MemoryLockManager};
use crate::rebuild::RebuildScheduler;
use crate::store::{CacheStore, MemoryStore};
use std::sync::Arc;
use tracing::info;

/// Build an accessor for the configured backend
///
/// # Errors
/// * `StoreUnavailable` - the Redis server could not be reached
/// * `UnsupportedBackend` - Redis was requested but the crate was built
///   without the `redis` feature
pub async fn create_accessor(config: &Config) -> CacheResult<CacheAccessor> {
    let (store, locks) = create_backend(config).await?;
    info!(
        "Using {} store with {} locks",
        store.backend_name(),
        locks.backend_name()
    );

    let scheduler = Arc::new(RebuildScheduler::new(config.rebuild.clone()));
    Ok(CacheAccessor::new(
        store,
        locks,
        scheduler,
        AccessorSettings::from_config(config),
    ))
}

type Backends = (Arc<dyn CacheStore>, Arc<dyn LockManager>);

async fn create_backend(config: &Config) -> CacheResult<Backends> {
    match config.store.backend {
        Backend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let locks = Arc::new(MemoryLockManager::new());
            let every = config.store.purge_interval();
            store.start_sweeper(every);
            locks.start_sweeper(every);
            Ok((store as Arc<dyn CacheStore>, locks as Arc<dyn LockManager>))
        }
        Backend::Redis => create_redis(&config.store.redis_url).await,
    }
}

#[cfg(feature = "redis")]
async fn create_redis(url: &str) -> CacheResult<Backends> {
    use crate::lock::RedisLockManager;
    use crate::store::RedisStore;

    let store = RedisStore::connect(url).await?;
    let locks = RedisLockManager::new(store.connection());
    Ok((Arc::new(store), Arc::new(locks)))
}

#[cfg(not(feature = "redis"))]
async fn create_redis(_url: &str) -> CacheResult<Backends> {
    Err(crate::error::CacheError::UnsupportedBackend(
        "redis".to_string(),
    ))
}
