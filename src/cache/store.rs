//! Cache Store Module
//!
//! Main cache engine: per-key lazy loading over a sharded map, with
//! expiration, refresh-ahead and removal notifications.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures::future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::builder::CacheBuilder;
use crate::cache::entry::CacheEntry;
use crate::cache::notify::{RemovalCause, RemovalListeners, SubscriptionId};
use crate::cache::policy::{Clock, ExpirationPolicy};
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::cache::traits::{loader_fn, CacheKey, CacheValue, Loader};
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_refresh_task, spawn_sweeper_task, sweep_expired};

/// Loader type used when a call supplies no loader of its own.
type NoLoader<K, V> = fn(K) -> future::Ready<anyhow::Result<V>>;

// == Shared State ==
/// State shared by cache handles and background tasks.
///
/// Background tasks hold a `Weak` reference, so dropping the last
/// [`LoadingCache`] handle disposes the cache.
pub(crate) struct Inner<K: CacheKey, V: CacheValue> {
    pub(crate) map: DashMap<K, Arc<CacheEntry<V>>>,
    pub(crate) options: CacheOptions,
    pub(crate) policy: ExpirationPolicy,
    pub(crate) clock: Clock,
    pub(crate) default_loader: Option<Loader<K, V>>,
    pub(crate) listeners: RemovalListeners<K, V>,
    pub(crate) stats: StatsCounter,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl<K: CacheKey, V: CacheValue> Inner<K, V> {
    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns the entry for `key`, inserting a pending one if absent.
    fn entry_for(&self, key: &K) -> Arc<CacheEntry<V>> {
        if let Some(entry) = self.map.get(key) {
            return Arc::clone(entry.value());
        }
        Arc::clone(
            self.map
                .entry(key.clone())
                .or_insert_with(|| Arc::new(CacheEntry::new()))
                .value(),
        )
    }

    /// Removes `key` only if the map still holds this exact entry.
    pub(crate) fn remove_if_same(&self, key: &K, entry: &Arc<CacheEntry<V>>) -> bool {
        self.map
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Drops a failed or unloadable entry so the next caller starts over.
    fn discard(&self, key: &K, entry: &Arc<CacheEntry<V>>) -> bool {
        let removed = self.remove_if_same(key, entry);
        entry.retire();
        removed
    }

    pub(crate) fn notify(&self, key: &K, value: &V, cause: RemovalCause) {
        self.listeners.notify(key, value, cause);
    }

    /// Restarts the entry's refresh task when refresh-ahead is configured.
    fn schedule_refresh(self: &Arc<Self>, key: &K, entry: &Arc<CacheEntry<V>>) {
        if self.options.refresh_after_write.is_zero() || self.default_loader.is_none() {
            return;
        }
        let period = self.options.refresh_after_write;
        entry.schedule_refresh(|| {
            spawn_refresh_task(Arc::downgrade(self), key.clone(), Arc::clone(entry), period)
        });
    }

    /// Removes every entry, notifying listeners if requested.
    fn clear(&self, notify: bool) -> usize {
        let mut removed = Vec::new();
        self.map.retain(|key, entry| {
            removed.push((key.clone(), Arc::clone(entry)));
            false
        });

        for (key, entry) in &removed {
            entry.retire();
            if notify {
                if let Some(value) = entry.value() {
                    self.notify(key, &value, RemovalCause::Explicit);
                }
            }
        }
        removed.len()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        let removed = self.clear(false);
        info!(removed, "Cache disposed");
    }
}

impl<K: CacheKey, V: CacheValue> Drop for Inner<K, V> {
    fn drop(&mut self) {
        self.dispose();
    }
}

// == Pending Load Guard ==
/// Discards a pending entry unless the load that owns it completes.
///
/// Held across the loader call, so a failed load and a get future dropped
/// mid-load both leave the key absent instead of stuck pending.
struct PendingLoad<'a, K: CacheKey, V: CacheValue> {
    inner: &'a Inner<K, V>,
    key: &'a K,
    entry: &'a Arc<CacheEntry<V>>,
    armed: bool,
}

impl<'a, K: CacheKey, V: CacheValue> PendingLoad<'a, K, V> {
    fn new(inner: &'a Inner<K, V>, key: &'a K, entry: &'a Arc<CacheEntry<V>>) -> Self {
        Self {
            inner,
            key,
            entry,
            armed: true,
        }
    }

    fn complete(mut self) {
        self.armed = false;
    }
}

impl<K: CacheKey, V: CacheValue> Drop for PendingLoad<'_, K, V> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.discard(self.key, self.entry);
        }
    }
}

// == Loading Cache ==
/// Concurrent read-through/write-through cache.
///
/// Cloning is cheap and yields another handle to the same cache.
pub struct LoadingCache<K: CacheKey, V: CacheValue> {
    inner: Arc<Inner<K, V>>,
}

impl<K: CacheKey, V: CacheValue> LoadingCache<K, V> {
    // == Constructors ==
    /// Creates a cache without a default loader.
    ///
    /// Must be called from within a tokio runtime when expiration is
    /// configured, since the background sweeper is spawned immediately.
    pub fn new(options: CacheOptions) -> Self {
        Self::from_parts(options, None)
    }

    /// Creates a cache whose misses are filled by `loader`.
    pub fn with_loader<F, Fut>(options: CacheOptions, loader: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self::from_parts(options, Some(loader_fn(loader)))
    }

    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_parts(options: CacheOptions, default_loader: Option<Loader<K, V>>) -> Self {
        if !options.refresh_after_write.is_zero() && default_loader.is_none() {
            debug!("refresh_after_write is ignored without a default loader");
        }

        let inner = Arc::new(Inner {
            map: DashMap::with_capacity_and_shard_amount(
                options.initial_capacity,
                options.shard_amount(),
            ),
            policy: ExpirationPolicy::from_options(&options),
            clock: Clock::new(),
            default_loader,
            listeners: RemovalListeners::new(),
            stats: StatsCounter::default(),
            sweeper: Mutex::new(None),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            options,
        });

        if inner.policy.is_enabled() {
            let handle = spawn_sweeper_task(
                Arc::downgrade(&inner),
                inner.options.effective_scan_interval(),
                inner.shutdown.clone(),
            );
            *inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Self { inner }
    }

    // == Get ==
    /// Returns the value for `key`, loading it with the default loader on a
    /// miss or after expiry.
    ///
    /// # Errors
    /// - `NotFound` if nothing is cached and there is no default loader
    /// - `LoaderFailure` if the default loader fails
    pub async fn get(&self, key: &K) -> Result<V> {
        self.get_or_load(key, None::<NoLoader<K, V>>).await
    }

    /// Like [`get`](Self::get), but loads with `loader` instead of the
    /// default loader.
    pub async fn get_with<F, Fut>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.get_or_load(key, Some(loader)).await
    }

    /// Like [`get_with`](Self::get_with), abandoning the call when `token` is
    /// cancelled. An abandoned first load leaves the key to the next caller.
    pub async fn get_with_cancellation<F, Fut>(
        &self,
        key: &K,
        loader: F,
        token: &CancellationToken,
    ) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CacheError::Cancelled(format!("{key:?}"))),
            result = self.get_with(key, loader) => result,
        }
    }

    async fn get_or_load<F, Fut>(&self, key: &K, mut loader: Option<F>) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(CacheError::Disposed);
        }

        loop {
            let entry = inner.entry_for(key);

            if entry.is_pending() {
                let guard = entry.lock().await;
                if entry.is_removed() || !entry.is_pending() {
                    // Discarded after a failed load, or loaded by a racing caller
                    continue;
                }

                // Removes the entry if this future is dropped mid-load
                let pending = PendingLoad::new(inner, key, &entry);
                inner.stats.record_miss();
                let value = self.load(key, loader.take()).await?;
                pending.complete();

                // An invalidate during the load wins; the caller still gets
                // the loaded value but it is not cached
                if entry.store(value.clone(), inner.now()).is_ok() {
                    inner.schedule_refresh(key, &entry);
                    drop(guard);
                    entry.touch(inner.now());
                }
                return Ok(value);
            }

            if entry.is_expired(&inner.policy, inner.now()) {
                let guard = entry.lock().await;
                if entry.is_removed() || !entry.is_expired(&inner.policy, inner.now()) {
                    // Evicted or renewed while we waited
                    continue;
                }

                inner.stats.record_miss();
                entry.stop_refresh();
                let previous = entry.value();
                return match self.load(key, loader.take()).await {
                    Ok(value) => {
                        // Rejected when an invalidate already reported the old value
                        if entry.store(value.clone(), inner.now()).is_ok() {
                            inner.schedule_refresh(key, &entry);
                            drop(guard);
                            entry.touch(inner.now());
                            if let Some(previous) = previous {
                                inner.stats.record_eviction();
                                inner.notify(key, &previous, RemovalCause::Expired);
                            }
                        }
                        Ok(value)
                    }
                    Err(err) => {
                        let removed = inner.discard(key, &entry);
                        drop(guard);
                        if let (true, Some(previous)) = (removed, previous) {
                            inner.stats.record_eviction();
                            inner.notify(key, &previous, RemovalCause::Expired);
                        }
                        Err(err)
                    }
                };
            }

            if let Some(value) = entry.value() {
                entry.touch(inner.now());
                inner.stats.record_hit();
                return Ok(value);
            }
        }
    }

    /// Runs the call's loader, falling back to the default loader.
    async fn load<F, Fut>(&self, key: &K, loader: Option<F>) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let loaded = match (loader, &self.inner.default_loader) {
            (Some(loader), _) => loader(key.clone()).await,
            (None, Some(default)) => default(key.clone()).await,
            (None, None) => return Err(CacheError::NotFound(format!("{key:?}"))),
        };

        match loaded {
            Ok(value) => {
                self.inner.stats.record_load_success();
                Ok(value)
            }
            Err(err) => {
                self.inner.stats.record_load_failure();
                debug!(key = ?key, error = %err, "Load failed");
                Err(CacheError::LoaderFailure(err))
            }
        }
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Listeners receive a `Replaced` notification carrying the previous value.
    pub async fn put(&self, key: K, mut value: V) -> Result<()> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(CacheError::Disposed);
        }

        loop {
            let entry = inner.entry_for(&key);
            let guard = entry.lock().await;
            if entry.is_removed() {
                continue;
            }

            entry.stop_refresh();
            let previous = match entry.store(value, inner.now()) {
                Ok(previous) => previous,
                Err(rejected) => {
                    // Invalidated since the check above; write to a fresh entry
                    value = rejected;
                    continue;
                }
            };
            inner.schedule_refresh(&key, &entry);
            drop(guard);

            if let Some(previous) = previous {
                inner.notify(&key, &previous, RemovalCause::Replaced);
            }
            return Ok(());
        }
    }

    /// Like [`put`](Self::put), abandoning the call when `token` is cancelled
    /// before the value is stored.
    pub async fn put_with_cancellation(
        &self,
        key: K,
        value: V,
        token: &CancellationToken,
    ) -> Result<()> {
        let label = format!("{key:?}");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CacheError::Cancelled(label)),
            result = self.put(key, value) => result,
        }
    }

    // == Invalidate ==
    /// Removes the given keys. Absent keys are ignored.
    pub fn invalidate<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a K>,
    {
        let inner = &self.inner;
        let mut count = 0;

        for key in keys {
            if let Some((key, entry)) = inner.map.remove(key) {
                entry.retire();
                count += 1;
                if let Some(value) = entry.value() {
                    inner.notify(&key, &value, RemovalCause::Explicit);
                }
            }
        }

        if count > 0 {
            inner.stats.record_invalidations(count);
            debug!(count, "Invalidated entries");
        }
    }

    /// Removes every entry, notifying listeners once per loaded entry.
    pub fn invalidate_all(&self) {
        let removed = self.inner.clear(true);
        self.inner.stats.record_invalidations(removed as u64);
        debug!(removed, "Invalidated all entries");
    }

    // == Clean Up ==
    /// Runs one expiration sweep now and returns the number of evicted entries.
    pub async fn clean_up(&self) -> usize {
        sweep_expired(&self.inner).await
    }

    // == Subscriptions ==
    /// Registers a removal listener.
    ///
    /// Listeners run synchronously on the task performing the removal, in
    /// subscription order, and must not block.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    // == Introspection ==
    /// Current number of entries, including ones still loading.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.len())
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub fn has_default_loader(&self) -> bool {
        self.inner.default_loader.is_some()
    }

    // == Dispose ==
    /// Stops the sweeper, removes all entries without notifying listeners and
    /// stops every refresh task. Later calls to `get` and `put` fail with
    /// `Disposed`. Also runs when the last handle is dropped.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner<K, V>> {
        &self.inner
    }
}

impl<K: CacheKey, V: CacheValue> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("len", &self.len())
            .field("options", &self.inner.options)
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}
