//! Shared fixtures for accessor tests

use super::{AccessorSettings, CacheAccessor};
use crate::config::schema::RebuildConfig;
use crate::error::{CacheError, CacheResult};
use crate::lock::{LockManager, LockToken, MemoryLockManager};
use crate::rebuild::RebuildScheduler;
use crate::store::{CacheStore, MemoryStore};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Caller-side error type, as an application would define it
#[derive(Debug, thiserror::Error)]
pub(crate) enum AppError {
    #[error("database unavailable")]
    Database,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Store wrapper with switchable failures
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::store("get", key, "connection refused"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::store("set", key, "read-only replica"));
        }
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::store("set_with_ttl", key, "read-only replica"));
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Lock manager that is always unreachable
pub(crate) struct DownLockManager;

#[async_trait]
impl LockManager for DownLockManager {
    async fn try_lock(
        &self,
        name: &str,
        _wait: Duration,
        _lease: Duration,
    ) -> CacheResult<Option<LockToken>> {
        Err(CacheError::lock(name, "connection refused"))
    }

    async fn unlock(&self, token: &LockToken) -> CacheResult<bool> {
        Err(CacheError::lock(&token.name, "connection refused"))
    }

    async fn is_held(&self, _token: &LockToken) -> CacheResult<bool> {
        Ok(false)
    }

    fn backend_name(&self) -> &'static str {
        "down"
    }
}

/// One "process": an accessor plus handles on its collaborators
pub(crate) struct Harness {
    pub accessor: CacheAccessor,
    pub store: Arc<MemoryStore>,
    pub locks: Arc<MemoryLockManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::sharing(Arc::new(MemoryStore::new()), Arc::new(MemoryLockManager::new()))
    }

    /// Another process fronting the same store and lock manager
    pub fn sharing(store: Arc<MemoryStore>, locks: Arc<MemoryLockManager>) -> Self {
        let accessor = CacheAccessor::new(
            store.clone(),
            locks.clone(),
            Arc::new(RebuildScheduler::new(small_pool())),
            fast_settings(),
        );
        Self {
            accessor,
            store,
            locks,
        }
    }
}

pub(crate) fn small_pool() -> RebuildConfig {
    RebuildConfig {
        core_workers: 2,
        max_workers: 4,
        queue_capacity: 16,
        keep_alive_secs: 60,
        worker_name_prefix: "test-rebuild-".to_string(),
    }
}

pub(crate) fn fast_settings() -> AccessorSettings {
    AccessorSettings {
        absent_ttl: Duration::from_secs(120),
        retry_backoff: Duration::from_millis(10),
        max_lock_attempts: 500,
    }
}

/// Number of times a loader ran
#[derive(Clone, Default)]
pub(crate) struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<Option<T>, AppError>> + Send>>;

/// A loader that sleeps for `latency` and returns `result`, counting calls
pub(crate) fn counting_loader<T>(
    result: Option<T>,
    latency: Duration,
) -> (
    impl FnOnce(String) -> LoadFuture<T> + Clone + Send + 'static,
    Calls,
)
where
    T: Clone + Send + 'static,
{
    let calls = Calls::default();
    let counter = calls.clone();
    let loader = move |_key: String| {
        counter.hit();
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok::<_, AppError>(result)
        }) as LoadFuture<T>
    };
    (loader, calls)
}

/// A loader that always fails, counting calls
pub(crate) fn failing_loader<T>() -> (
    impl FnOnce(String) -> std::future::Ready<Result<Option<T>, AppError>> + Clone + Send + 'static,
    Calls,
)
where
    T: Send + 'static,
{
    let calls = Calls::default();
    let counter = calls.clone();
    let loader = move |_key: String| {
        counter.hit();
        std::future::ready(Err::<Option<T>, _>(AppError::Database))
    };
    (loader, calls)
}
