use std::future::Future;
use std::time::Duration;

use crate::cache::traits::{loader_fn, CacheKey, CacheValue, Loader};
use crate::cache::LoadingCache;
use crate::config::CacheOptions;

/// Builder for configuring a [`LoadingCache`].
///
/// # Example
///
/// ```ignore
/// let cache = LoadingCache::<String, usize>::builder()
///     .expire_after_write(Duration::from_secs(30))
///     .refresh_after_write(Duration::from_secs(10))
///     .loader(|key: String| async move { Ok(key.len()) })
///     .build();
/// ```
pub struct CacheBuilder<K: CacheKey, V: CacheValue> {
    options: CacheOptions,
    loader: Option<Loader<K, V>>,
}

impl<K: CacheKey, V: CacheValue> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self {
            options: CacheOptions::default(),
            loader: None,
        }
    }

    /// Replace all options at once, e.g. with [`CacheOptions::from_env`].
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Sharding hint. Rounded up to a power of two.
    pub fn concurrency_level(mut self, level: usize) -> Self {
        self.options = self.options.with_concurrency_level(level);
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.options = self.options.with_initial_capacity(capacity);
        self
    }

    /// Reload entries in the background this long after each write.
    ///
    /// Only takes effect together with a default [`loader`](Self::loader).
    pub fn refresh_after_write(mut self, after: Duration) -> Self {
        self.options = self.options.with_refresh_after_write(after);
        self
    }

    pub fn expire_after_write(mut self, after: Duration) -> Self {
        self.options = self.options.with_expire_after_write(after);
        self
    }

    pub fn expire_after_read(mut self, after: Duration) -> Self {
        self.options = self.options.with_expire_after_read(after);
        self
    }

    /// Interval of the background sweep. Default: 1 minute.
    pub fn expiration_scan_interval(mut self, interval: Duration) -> Self {
        self.options = self.options.with_expiration_scan_interval(interval);
        self
    }

    /// Default loader used by `get` and by background refresh.
    pub fn loader<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.loader = Some(loader_fn(f));
        self
    }

    /// Build the cache. Starts the background sweeper when expiration is
    /// configured, so this must be called from within a tokio runtime.
    pub fn build(self) -> LoadingCache<K, V> {
        LoadingCache::from_parts(self.options, self.loader)
    }
}

impl<K: CacheKey, V: CacheValue> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
