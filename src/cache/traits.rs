use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

/// Bounds required of cache keys.
///
/// Keys are cloned into background tasks and formatted into error messages
/// and log fields. Implemented for every type meeting the bounds.
pub trait CacheKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

/// Bounds required of cached values. Reads hand out clones, so wrap large
/// values in an `Arc`.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// A shareable asynchronous loader, used as a cache's default loader.
pub type Loader<K, V> = Arc<dyn Fn(K) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// Wraps an async closure into a [`Loader`].
pub fn loader_fn<K, V, F, Fut>(f: F) -> Loader<K, V>
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    Arc::new(move |key| f(key).boxed())
}
