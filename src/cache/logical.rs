//! Logical-expiration strategy: serve stale, rebuild in the background
//!
//! Entries live in the store without a TTL and carry their own expiry. A
//! stale read never waits for the source; the first reader to win the
//! rebuild lock schedules a refresh and everyone keeps getting the old value
//! until it lands.
//!
//! The rebuild lock is never released explicitly. It lapses when its lease
//! runs out, which caps rebuilds at one per key per lease window regardless of
//! how quickly the job finishes.

use super::{logical_payload, CacheAccessor, CacheEntry};
use crate::error::CacheError;
use crate::lock::{rebuild_lock_name, LockTiming};
use crate::rebuild::RebuildJob;
use crate::store::CacheStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Result of a logical-expiration read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalRead<T> {
    /// Entry is within its logical lifetime
    Fresh(T),
    /// Entry has expired; a rebuild may be under way
    Stale(T),
    /// Nothing cached; the caller must load and prime the key itself
    Missing,
}

impl<T> LogicalRead<T> {
    /// The cached value, fresh or stale
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Fresh(value) | Self::Stale(value) => Some(value),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

impl CacheAccessor {
    /// Read a logically expiring key, scheduling a rebuild when it is stale
    ///
    /// Never calls the loader on the calling task. Returns
    /// [`LogicalRead::Missing`] when the key has not been primed with
    /// [`CacheAccessor::set_with_logical_expire`].
    pub async fn query_logical_expire<T, E, F, Fut>(
        &self,
        key: &str,
        timing: LockTiming,
        logical_ttl: Duration,
        loader: F,
    ) -> Result<LogicalRead<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: From<CacheError> + Display + Send + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
    {
        let Some(entry) = self.read_entry::<T>(key).await? else {
            debug!("No logical entry for {}", key);
            return Ok(LogicalRead::Missing);
        };

        if entry.is_fresh() {
            return Ok(LogicalRead::Fresh(entry.value));
        }

        let lock_name = rebuild_lock_name(key);
        let Some(token) = self.acquire(&lock_name, timing).await else {
            debug!("Rebuild of {} already claimed, serving stale value", key);
            return Ok(LogicalRead::Stale(entry.value));
        };

        // Someone may have finished a rebuild between our read and the lock
        match self.read_entry::<T>(key).await {
            Ok(Some(current)) if current.is_fresh() => {
                self.release(&token).await;
                return Ok(LogicalRead::Fresh(current.value));
            }
            Ok(_) => {}
            Err(e) => warn!("Re-reading {} under rebuild lock failed: {}", key, e),
        }

        let job = rebuild_job(Arc::clone(&self.store), key.to_string(), logical_ttl, loader);
        let outcome = self.scheduler.submit(job).await;
        debug!("Scheduled rebuild of {} ({:?}), lock {}", key, outcome, token);

        Ok(LogicalRead::Stale(entry.value))
    }

    async fn read_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>, CacheError> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| super::codec::decode(key, &raw)))
    }
}

/// Load `key` and overwrite its entry; every failure is logged and dropped
fn rebuild_job<T, E, F, Fut>(
    store: Arc<dyn CacheStore>,
    key: String,
    logical_ttl: Duration,
    loader: F,
) -> RebuildJob
where
    T: Serialize + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
{
    let span = info_span!("rebuild", key = %key);
    Box::pin(
        async move {
            let value = match loader(key.clone()).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!("Loader found nothing, keeping stale entry");
                    return;
                }
                Err(e) => {
                    error!("Async cache rebuild failed for key {}: {}", key, e);
                    return;
                }
            };

            let raw = match logical_payload(&value, logical_ttl) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to encode rebuilt entry {}: {}", key, e);
                    return;
                }
            };
            match store.set(&key, raw).await {
                Ok(()) => info!("Rebuilt cache entry {}", key),
                Err(e) => warn!("Failed to write rebuilt entry {}: {}", key, e),
            }
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use super::super::codec;
    use super::super::testing::*;
    use super::*;
    use crate::rebuild::RebuildScheduler;
    use chrono::Utc;
    use std::time::Instant;

    const LOGICAL_TTL: Duration = Duration::from_secs(20);

    fn timing(lease: Duration) -> LockTiming {
        LockTiming::non_blocking(lease)
    }

    async fn prime_stale(h: &Harness, key: &str, value: &str) {
        let entry = CacheEntry::new(value.to_string(), Utc::now() - chrono::Duration::seconds(1));
        h.store
            .set(key, codec::encode(&entry).unwrap())
            .await
            .unwrap();
    }

    async fn stored_entry(h: &Harness, key: &str) -> CacheEntry<String> {
        let raw = h.store.get(key).await.unwrap().unwrap();
        codec::decode(key, &raw).unwrap()
    }

    #[tokio::test]
    async fn cold_key_is_missing() {
        let h = Harness::new();
        let (loader, calls) = counting_loader(Some("v".to_string()), Duration::ZERO);

        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:1",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();

        assert!(read.is_missing());
        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn fresh_entry_never_touches_loader() {
        let h = Harness::new();
        h.accessor
            .set_with_logical_expire("spot:2", &"cached".to_string(), LOGICAL_TTL)
            .await
            .unwrap();
        let (loader, calls) = counting_loader(Some("new".to_string()), Duration::ZERO);

        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:2",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();

        assert_eq!(read, LogicalRead::Fresh("cached".to_string()));
        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 0);
        assert_eq!(h.accessor.scheduler().stats().completed, 0);
        assert!(!h.locks.is_locked("spot:2:lock"));
    }

    #[tokio::test]
    async fn stale_entry_served_then_rebuilt() {
        let h = Harness::new();
        prime_stale(&h, "post:500", "old").await;
        let (loader, calls) = counting_loader(Some("new".to_string()), Duration::from_millis(50));

        let started = Instant::now();
        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "post:500",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();

        assert_eq!(read, LogicalRead::Stale("old".to_string()));
        assert!(started.elapsed() < Duration::from_millis(50));

        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 1);

        let entry = stored_entry(&h, "post:500").await;
        assert_eq!(entry.value, "new");
        assert!(entry.logical_expire_at > Utc::now());

        let (loader, calls) = counting_loader(Some("newer".to_string()), Duration::ZERO);
        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "post:500",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();
        assert_eq!(read, LogicalRead::Fresh("new".to_string()));
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stale_readers_schedule_one_rebuild() {
        let h = Arc::new(Harness::new());
        prime_stale(&h, "post:501", "old").await;
        let (loader, calls) = counting_loader(Some("new".to_string()), Duration::from_millis(200));

        let started = Instant::now();
        let mut readers = Vec::new();
        for _ in 0..16 {
            let h = Arc::clone(&h);
            let loader = loader.clone();
            readers.push(tokio::spawn(async move {
                h.accessor
                    .query_logical_expire::<String, AppError, _, _>(
                        "post:501",
                        timing(Duration::from_secs(10)),
                        LOGICAL_TTL,
                        loader,
                    )
                    .await
                    .unwrap()
            }));
        }
        for reader in readers {
            assert_eq!(reader.await.unwrap(), LogicalRead::Stale("old".to_string()));
        }
        // Nobody waited for the 200ms loader
        assert!(started.elapsed() < Duration::from_millis(200));

        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 1);
    }

    #[tokio::test]
    async fn lease_limits_rebuild_rate() {
        let h = Harness::new();
        let lease = Duration::from_millis(150);
        prime_stale(&h, "spot:7", "v1").await;

        let (loader, calls) = counting_loader(Some("v2".to_string()), Duration::ZERO);
        h.accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:7",
                timing(lease),
                LOGICAL_TTL,
                loader.clone(),
            )
            .await
            .unwrap();
        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 1);
        // The job finished but the lock is left to its lease
        assert!(h.locks.is_locked("spot:7:lock"));

        // Stale again inside the same lease window: no second rebuild
        prime_stale(&h, "spot:7", "v2").await;
        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:7",
                timing(lease),
                LOGICAL_TTL,
                loader.clone(),
            )
            .await
            .unwrap();
        assert!(read.is_stale());
        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 1);

        // Once the lease lapses the next stale read rebuilds again
        tokio::time::sleep(lease + Duration::from_millis(50)).await;
        h.accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:7",
                timing(lease),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();
        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 2);
    }

    #[tokio::test]
    async fn entry_refreshed_by_peer_reads_fresh() {
        let h = Harness::new();
        prime_stale(&h, "spot:8", "old").await;

        // Another process fronting the same store refreshes the key
        let refresher = Harness::sharing(h.store.clone(), h.locks.clone());
        refresher
            .accessor
            .set_with_logical_expire("spot:8", &"refreshed".to_string(), LOGICAL_TTL)
            .await
            .unwrap();
        let (loader, calls) = counting_loader(Some("mine".to_string()), Duration::ZERO);
        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:8",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();

        assert_eq!(read, LogicalRead::Fresh("refreshed".to_string()));
        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_serving_stale() {
        let h = Harness::new();
        prime_stale(&h, "spot:9", "old").await;
        let (loader, calls) = failing_loader::<String>();

        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:9",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();
        assert!(read.is_stale());

        h.accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 1);
        assert_eq!(h.accessor.scheduler().stats().panicked, 0);

        let entry = stored_entry(&h, "spot:9").await;
        assert_eq!(entry.value, "old");
        assert!(!entry.is_fresh());
    }

    #[tokio::test]
    async fn rebuild_finding_nothing_keeps_entry() {
        let h = Harness::new();
        prime_stale(&h, "spot:10", "old").await;
        let (loader, _calls) = counting_loader::<String>(None, Duration::ZERO);

        h.accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:10",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();
        h.accessor.scheduler().wait_idle().await;

        assert_eq!(stored_entry(&h, "spot:10").await.value, "old");
    }

    #[tokio::test]
    async fn lock_manager_outage_serves_stale_without_rebuild() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let accessor = CacheAccessor::new(
            store.clone(),
            Arc::new(DownLockManager),
            Arc::new(RebuildScheduler::new(small_pool())),
            fast_settings(),
        );
        let entry = CacheEntry::new("old".to_string(), Utc::now() - chrono::Duration::seconds(1));
        store
            .set("spot:11", codec::encode(&entry).unwrap())
            .await
            .unwrap();
        let (loader, calls) = counting_loader(Some("new".to_string()), Duration::ZERO);

        let read = accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:11",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();

        assert_eq!(read, LogicalRead::Stale("old".to_string()));
        accessor.scheduler().wait_idle().await;
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn garbage_entry_reads_as_missing() {
        let h = Harness::new();
        h.store.set("spot:12", "\"just a string\"".to_string()).await.unwrap();
        let (loader, _) = counting_loader(Some("v".to_string()), Duration::ZERO);

        let read = h
            .accessor
            .query_logical_expire::<String, AppError, _, _>(
                "spot:12",
                timing(Duration::from_secs(10)),
                LOGICAL_TTL,
                loader,
            )
            .await
            .unwrap();
        assert!(read.is_missing());
    }

    #[test]
    fn logical_read_accessors() {
        assert_eq!(LogicalRead::Stale(1).into_option(), Some(1));
        assert_eq!(LogicalRead::Fresh(2).into_option(), Some(2));
        assert_eq!(LogicalRead::<u8>::Missing.into_option(), None);
    }
}
