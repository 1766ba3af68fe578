//! Per-key in-process load registry
//!
//! The first caller to claim a key becomes the leader; later callers in the
//! same process get a receiver that resolves once the leader's guard is
//! dropped, whether it finished, failed or was cancelled.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of claiming a key
pub(crate) enum Claim {
    /// No load in flight; the caller must perform it while holding the guard
    Leader(LeaderGuard),
    /// Another caller is loading; wait on the receiver, then re-read the store
    Follower(watch::Receiver<()>),
}

/// Registry of keys currently being loaded by this process
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    keys: Arc<DashMap<String, watch::Sender<()>>>,
}

impl InFlight {
    pub(crate) fn claim(&self, key: &str) -> Claim {
        match self.keys.entry(key.to_string()) {
            // Subscribing under the shard lock means the leader cannot finish
            // between our lookup and our subscription
            Entry::Occupied(current) => Claim::Follower(current.get().subscribe()),
            Entry::Vacant(slot) => {
                let (sender, _) = watch::channel(());
                slot.insert(sender);
                Claim::Leader(LeaderGuard {
                    keys: Arc::clone(&self.keys),
                    key: key.to_string(),
                })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Marks a key as being loaded; releases followers on drop
pub(crate) struct LeaderGuard {
    keys: Arc<DashMap<String, watch::Sender<()>>>,
    key: String,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        // Dropping the sender closes every follower's receiver
        self.keys.remove(&self.key);
    }
}

/// Wait until the leader behind `done` lets go of its key
pub(crate) async fn wait_for_leader(mut done: watch::Receiver<()>) {
    // No value is ever sent, so this only returns once the sender is dropped
    while done.changed().await.is_ok() {}
}
