//! Cache Entry Module
//!
//! Per-key cache state: value slot, exclusion lock, timestamps and refresh handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::cache::policy::{ExpirationPolicy, Timestamps};

// == Slot ==
/// Value state of an entry. A pending entry has no value to read.
#[derive(Debug)]
pub(crate) enum Slot<V> {
    Pending,
    Ready(V),
}

// == Cache Entry ==
/// The cache's record for one key.
///
/// `lock` serializes load, refresh and write transitions and may be held
/// across a loader call. `slot` is only ever locked briefly, so readers are
/// never blocked by an in-flight load of an already loaded entry.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    slot: RwLock<Slot<V>>,
    lock: AsyncMutex<()>,
    /// Nanoseconds since the owning cache's clock epoch
    last_read: AtomicU64,
    last_written: AtomicU64,
    removed: AtomicBool,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a pending entry.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Pending),
            lock: AsyncMutex::new(()),
            last_read: AtomicU64::new(0),
            last_written: AtomicU64::new(0),
            removed: AtomicBool::new(false),
            refresh: Mutex::new(None),
        }
    }

    /// Acquires the entry's exclusion lock.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            *self.slot.read().unwrap_or_else(PoisonError::into_inner),
            Slot::Pending
        )
    }

    /// Stores a value and stamps the write time, returning the previous value.
    /// The first store also starts the read clock.
    ///
    /// A retired entry rejects the store and hands the value back, so nothing
    /// written after removal is ever observed or notified.
    ///
    /// Callers must hold the exclusion lock.
    pub fn store(&self, value: V, now: Duration) -> Result<Option<V>, V> {
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if self.is_removed() {
                return Err(value);
            }
            std::mem::replace(&mut *slot, Slot::Ready(value))
        };
        self.last_written.store(as_nanos(now), Ordering::Release);
        match previous {
            Slot::Ready(value) => Ok(Some(value)),
            Slot::Pending => {
                self.last_read.store(as_nanos(now), Ordering::Release);
                Ok(None)
            }
        }
    }

    /// Records a successful read.
    pub fn touch(&self, now: Duration) {
        self.last_read.store(as_nanos(now), Ordering::Release);
    }

    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            last_read: Duration::from_nanos(self.last_read.load(Ordering::Acquire)),
            last_written: Duration::from_nanos(self.last_written.load(Ordering::Acquire)),
        }
    }

    // == Is Expired ==
    /// Lock-free staleness check. A pending entry is never expired.
    pub fn is_expired(&self, policy: &ExpirationPolicy, now: Duration) -> bool {
        policy.is_enabled() && !self.is_pending() && policy.is_expired(self.timestamps(), now)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    // == Refresh Schedule ==
    /// Replaces the refresh task with one produced by `spawn`.
    ///
    /// Does nothing once the entry is retired, so a late write cannot revive
    /// the schedule of a removed entry.
    pub fn schedule_refresh(&self, spawn: impl FnOnce() -> JoinHandle<()>) {
        let mut refresh = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_removed() {
            return;
        }
        if let Some(task) = refresh.take() {
            task.abort();
        }
        *refresh = Some(spawn());
    }

    /// Stops the refresh task, if any.
    pub fn stop_refresh(&self) {
        let task = self
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    // == Retire ==
    /// Marks the entry removed and stops its refresh task. Terminal.
    ///
    /// The flag is set under the slot lock, so once this returns the value
    /// read by [`value`](Self::value) is final.
    pub fn retire(&self) {
        let mut refresh = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let _slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            self.removed.store(true, Ordering::Release);
        }
        if let Some(task) = refresh.take() {
            task.abort();
        }
    }
}

impl<V: Clone> CacheEntry<V> {
    /// Returns a copy of the value, or None while pending.
    pub fn value(&self) -> Option<V> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Ready(value) => Some(value.clone()),
            Slot::Pending => None,
        }
    }
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn as_nanos(offset: Duration) -> u64 {
    u64::try_from(offset.as_nanos()).unwrap_or(u64::MAX)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_entry_starts_pending() {
        let entry: CacheEntry<String> = CacheEntry::new();

        assert!(entry.is_pending());
        assert!(entry.value().is_none());
        assert!(!entry.is_removed());
    }

    #[test]
    fn test_store_returns_previous() {
        let entry = CacheEntry::new();

        assert_eq!(entry.store("v1".to_string(), ms(5)), Ok(None));
        assert!(!entry.is_pending());
        assert_eq!(
            entry.store("v2".to_string(), ms(9)),
            Ok(Some("v1".to_string()))
        );
        assert_eq!(entry.value().as_deref(), Some("v2"));
        assert_eq!(entry.timestamps().last_written, ms(9));
    }

    #[test]
    fn test_pending_entry_never_expires() {
        let entry: CacheEntry<u32> = CacheEntry::new();
        let policy = ExpirationPolicy {
            expire_after_write: ms(1),
            ..Default::default()
        };

        assert!(!entry.is_expired(&policy, ms(1_000)));

        assert!(entry.store(1, ms(0)).is_ok());
        assert!(entry.is_expired(&policy, ms(1_000)));
    }

    #[test]
    fn test_touch_updates_last_read() {
        let entry = CacheEntry::new();
        assert!(entry.store(7u32, ms(1)).is_ok());

        assert_eq!(entry.timestamps().last_read, ms(1));
        entry.touch(ms(42));

        let stamps = entry.timestamps();
        assert_eq!(stamps.last_read, ms(42));
        assert_eq!(stamps.last_written, ms(1));
    }

    #[tokio::test]
    async fn test_retire_stops_refresh_and_blocks_rescheduling() {
        let entry: CacheEntry<u32> = CacheEntry::new();
        entry.schedule_refresh(|| tokio::spawn(std::future::pending::<()>()));

        entry.retire();
        assert!(entry.is_removed());

        let mut spawned = false;
        entry.schedule_refresh(|| {
            spawned = true;
            tokio::spawn(async {})
        });
        assert!(!spawned, "Retired entry must not reschedule");
    }

    #[test]
    fn test_store_after_retire_is_rejected() {
        let entry = CacheEntry::new();
        assert!(entry.store(1u32, ms(1)).is_ok());

        entry.retire();

        assert_eq!(entry.store(2, ms(2)), Err(2));
        assert_eq!(entry.value(), Some(1), "Retired value stays final");
        assert_eq!(entry.timestamps().last_written, ms(1));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let entry: CacheEntry<u32> = CacheEntry::new();
        let guard = entry.lock().await;

        assert!(entry.lock.try_lock().is_err());
        drop(guard);
        assert!(entry.lock.try_lock().is_ok());
    }
}
