//! Refresh-Ahead Task
//!
//! Per-entry background task that reloads a value with the default loader
//! every `period`, without blocking readers of the current value.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, CacheValue, Inner, RemovalCause};

/// Spawns the refresh task for one entry.
///
/// The task runs until the entry is retired, the cache is dropped, or the
/// handle is aborted by a foreground write that restarts the schedule.
pub(crate) fn spawn_refresh_task<K: CacheKey, V: CacheValue>(
    cache: Weak<Inner<K, V>>,
    key: K,
    entry: Arc<CacheEntry<V>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if entry.is_removed() {
                break;
            }
            let Some(inner) = cache.upgrade() else {
                break;
            };
            if !refresh_entry(&inner, &key, &entry).await {
                break;
            }
        }
        debug!(key = ?key, "Refresh task deregistered");
    })
}

/// Reloads one entry under its lock. Returns false once the entry is gone.
///
/// A loader failure keeps the current value and the schedule, so the next
/// period retries.
async fn refresh_entry<K: CacheKey, V: CacheValue>(
    inner: &Inner<K, V>,
    key: &K,
    entry: &CacheEntry<V>,
) -> bool {
    let Some(loader) = inner.default_loader.clone() else {
        return false;
    };

    let guard = entry.lock().await;
    if entry.is_removed() {
        return false;
    }

    match loader(key.clone()).await {
        Ok(value) => {
            let Ok(previous) = entry.store(value, inner.now()) else {
                // Invalidated mid-reload
                return false;
            };
            drop(guard);
            inner.stats.record_refresh();
            if let Some(previous) = previous {
                inner.notify(key, &previous, RemovalCause::Replaced);
            }
        }
        Err(err) => {
            drop(guard);
            inner.stats.record_load_failure();
            warn!(key = ?key, error = %err, "Background refresh failed");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::cache::{LoadingCache, RemovalCause};
    use crate::config::CacheOptions;

    use super::*;

    fn counting_cache(refresh_ms: u64, calls: Arc<AtomicUsize>) -> LoadingCache<String, usize> {
        LoadingCache::with_loader(
            CacheOptions::default().with_refresh_after_write(Duration::from_millis(refresh_ms)),
            move |_key: String| {
                let calls = calls.clone();
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_reloads_without_reads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, calls.clone());
        let key = "a".to_string();

        assert_eq!(cache.get(&key).await.unwrap(), 1);
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(cache.len(), 1, "Refresh must never evict");
        }

        assert!(calls.load(Ordering::SeqCst) >= 4);
        assert!(cache.stats().refreshes >= 3);
        assert_eq!(cache.get(&key).await.unwrap(), calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_emits_replaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, calls);
        let causes = Arc::new(Mutex::new(Vec::new()));
        let sink = causes.clone();
        cache.subscribe(move |_, value, cause| sink.lock().unwrap().push((*value, cause)));

        cache.get(&"a".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(
            *causes.lock().unwrap(),
            vec![(1, RemovalCause::Replaced), (2, RemovalCause::Replaced)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_value_and_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: LoadingCache<String, usize> = LoadingCache::with_loader(
            CacheOptions::default().with_refresh_after_write(Duration::from_millis(10)),
            move |_key: String| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        anyhow::bail!("transient failure");
                    }
                    Ok(attempt)
                }
            },
        );
        let key = "a".to_string();

        assert_eq!(cache.get(&key).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(cache.get(&key).await.unwrap(), 0, "Failed refresh keeps the old value");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get(&key).await.unwrap(), 2, "Schedule survives a failure");
        assert_eq!(cache.stats().load_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_stops_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, calls.clone());
        let key = "a".to_string();

        cache.get(&key).await.unwrap();
        cache.invalidate([&key]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_restarts_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, calls.clone());
        let key = "a".to_string();

        cache.put(key.clone(), 100).await.unwrap();
        tokio::time::sleep(Duration::from_millis(6)).await;
        cache.put(key.clone(), 200).await.unwrap();
        tokio::time::sleep(Duration::from_millis(6)).await;

        // First schedule was replaced before it fired
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.get(&key).await.unwrap(), 200);

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
