//! In-process lock manager
//!
//! Leases run on the tokio clock. Waiters park on a shared `Notify` and wake
//! on any release, on the current holder's lease running out, or on their own
//! deadline, whichever comes first.

use super::{LockManager, LockToken};
use crate::error::CacheResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Held {
    holder: Uuid,
    expires_at: Instant,
}

impl Held {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory [`LockManager`]
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    locks: DashMap<String, Held>,
    released: Notify,
}

impl MemoryLockManager {
    /// Create a lock manager with no locks held
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if anyone currently holds `name`
    pub fn is_locked(&self, name: &str) -> bool {
        let now = Instant::now();
        self.locks.get(name).is_some_and(|h| !h.is_expired(now))
    }

    /// Forget every lock whose lease has run out, returning how many
    ///
    /// Locks that are never released, such as rebuild locks, otherwise stay in
    /// the map after their lease ends.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, held| !held.is_expired(now));
        before.saturating_sub(self.locks.len())
    }

    /// Purge expired locks every `every` for as long as the manager is alive
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        crate::sweep::spawn_sweeper(self, every, "lock", Self::purge_expired)
    }

    fn attempt(&self, name: &str, lease: Duration) -> Option<LockToken> {
        let now = Instant::now();
        let token = LockToken::new(name, lease);
        let held = Held {
            holder: token.holder,
            expires_at: now + lease,
        };

        match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut current) => {
                if !current.get().is_expired(now) {
                    return None;
                }
                trace!("Lock {} lease expired, taking over", name);
                current.insert(held);
            }
            Entry::Vacant(slot) => {
                slot.insert(held);
            }
        }
        Some(token)
    }

    fn current_expiry(&self, name: &str) -> Option<Instant> {
        self.locks.get(name).map(|h| h.expires_at)
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> CacheResult<Option<LockToken>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register before attempting so a release in between is not missed
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(token) = self.attempt(name, lease) {
                trace!("Acquired lock {}", token);
                return Ok(Some(token));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wake_at = self
                .current_expiry(name)
                .map_or(deadline, |expiry| expiry.min(deadline));

            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn unlock(&self, token: &LockToken) -> CacheResult<bool> {
        let now = Instant::now();
        let removed = self
            .locks
            .remove_if(&token.name, |_, held| held.holder == token.holder);

        match removed {
            Some((_, held)) => {
                self.released.notify_waiters();
                trace!("Released lock {}", token);
                Ok(!held.is_expired(now))
            }
            None => Ok(false),
        }
    }

    async fn is_held(&self, token: &LockToken) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .locks
            .get(&token.name)
            .is_some_and(|h| h.holder == token.holder && !h.is_expired(now)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
