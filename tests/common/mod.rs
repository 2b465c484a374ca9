//! Shared helpers for integration tests

use std::sync::{Arc, Mutex};

use loading_cache::{LoadingCache, RemovalCause};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub type Events<V> = Arc<Mutex<Vec<(String, V, RemovalCause)>>>;

/// Installs a test subscriber once. Defaults to debug output for this crate,
/// overridable with RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loading_cache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Subscribes a listener that records every removal.
pub fn record_removals<V>(cache: &LoadingCache<String, V>) -> Events<V>
where
    V: Clone + Send + Sync + 'static,
{
    let events: Events<V> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    cache.subscribe(move |key, value, cause| {
        sink.lock().unwrap().push((key.clone(), value.clone(), cause));
    });
    events
}
