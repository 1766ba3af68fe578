//! Periodic removal of expired entries from the in-memory backends

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Run `purge` on `target` every `every` until the target is dropped
///
/// Returns `None` without spawning when `every` is zero.
pub(crate) fn spawn_sweeper<T, F>(
    target: &Arc<T>,
    every: Duration,
    label: &'static str,
    purge: F,
) -> Option<JoinHandle<()>>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> usize + Send + 'static,
{
    if every.is_zero() {
        return None;
    }

    let target: Weak<T> = Arc::downgrade(target);
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(target) = target.upgrade() else {
                debug!("{} sweeper stopping, backend dropped", label);
                return;
            };
            let purged = purge(&target);
            if purged > 0 {
                debug!("{} sweeper removed {} expired entries", label, purged);
            }
        }
    }))
}
