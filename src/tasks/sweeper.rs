//! Expiration Sweep Task
//!
//! Background task that periodically evicts expired cache entries.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheKey, CacheValue, Inner, RemovalCause};

/// Spawns a background task that sweeps expired entries every `interval`.
///
/// The task holds only a weak reference to the cache and exits when the
/// cache is dropped or `shutdown` is cancelled.
pub(crate) fn spawn_sweeper_task<K: CacheKey, V: CacheValue>(
    cache: Weak<Inner<K, V>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting expiration sweep task"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Expiration sweep task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let Some(inner) = cache.upgrade() else {
                        break;
                    };
                    let removed = sweep_expired(&inner).await;

                    if removed > 0 {
                        info!(removed, "Expiration sweep: evicted expired entries");
                    } else {
                        debug!("Expiration sweep: no expired entries found");
                    }
                }
            }
        }
    })
}

/// Evicts every expired entry and returns how many were removed.
///
/// Candidates come from a lock-free scan. Each one is re-checked under its
/// entry lock and removed only if the map still holds that same entry, so an
/// entry reloaded or replaced in the meantime survives.
pub(crate) async fn sweep_expired<K: CacheKey, V: CacheValue>(inner: &Inner<K, V>) -> usize {
    if !inner.policy.is_enabled() {
        return 0;
    }

    let now = inner.now();
    let candidates: Vec<(K, Arc<CacheEntry<V>>)> = inner
        .map
        .iter()
        .filter(|item| item.value().is_expired(&inner.policy, now))
        .map(|item| (item.key().clone(), Arc::clone(item.value())))
        .collect();

    let mut removed = 0;
    for (key, entry) in candidates {
        let guard = entry.lock().await;
        if entry.is_removed() || !entry.is_expired(&inner.policy, inner.now()) {
            continue;
        }
        if !inner.remove_if_same(&key, &entry) {
            continue;
        }

        entry.retire();
        drop(guard);
        removed += 1;
        inner.stats.record_eviction();
        if let Some(value) = entry.value() {
            inner.notify(&key, &value, RemovalCause::Expired);
        }
    }
    removed
}
