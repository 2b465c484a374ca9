//! Removal Notification Module
//!
//! Observer list fanning out removal events synchronously, in subscription order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

// == Removal Cause ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalCause {
    /// Invalidated by the caller
    Explicit,
    /// Overwritten by a put or a background refresh
    Replaced,
    /// Aged out under the expiration policy
    Expired,
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalCause::Explicit => "explicit",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Callback invoked with the key, the removed value and the cause.
pub type RemovalListener<K, V> = Arc<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// == Listener Registry ==
pub(crate) struct RemovalListeners<K, V> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, RemovalListener<K, V>)>>,
}

impl<K, V> RemovalListeners<K, V> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: RemovalListener<K, V>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // == Notify ==
    /// Invokes every listener on the calling thread.
    ///
    /// The list is snapshotted first so listeners may subscribe or
    /// unsubscribe from within a callback.
    pub fn notify(&self, key: &K, value: &V, cause: RemovalCause) {
        let snapshot: Vec<RemovalListener<K, V>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(key, value, cause);
        }
    }
}

impl<K, V> fmt::Debug for RemovalListeners<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovalListeners")
            .field("count", &self.len())
            .finish()
    }
}
