//! Expiration Policy Module
//!
//! Pure staleness evaluation over an entry's read/write timestamps.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::CacheOptions;

// == Clock ==
/// Monotonic clock shared by a cache and its entries.
///
/// Instants are stored as offsets from the clock's epoch so entries can keep
/// them in atomics. Backed by the tokio clock, which honors paused time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Time elapsed since the epoch.
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

// == Timestamps ==
/// Last read and last write offsets of one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub last_read: Duration,
    pub last_written: Duration,
}

// == Expiration Policy ==
/// Expiration durations; zero disables a clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub expire_after_write: Duration,
    pub expire_after_read: Duration,
}

impl ExpirationPolicy {
    pub fn from_options(options: &CacheOptions) -> Self {
        Self {
            expire_after_write: options.expire_after_write,
            expire_after_read: options.expire_after_read,
        }
    }

    /// Returns true if any expiration clock is configured.
    pub fn is_enabled(&self) -> bool {
        !self.expire_after_write.is_zero() || !self.expire_after_read.is_zero()
    }

    // == Is Expired ==
    /// Checks whether an entry with the given timestamps is stale at `now`.
    ///
    /// Boundary condition: an entry is expired once the elapsed time is greater
    /// than or equal to the configured duration. A timestamp later than `now`
    /// (written concurrently) counts as zero elapsed time.
    pub fn is_expired(&self, stamps: Timestamps, now: Duration) -> bool {
        let written_expired = !self.expire_after_write.is_zero()
            && now.saturating_sub(stamps.last_written) >= self.expire_after_write;
        let read_expired = !self.expire_after_read.is_zero()
            && now.saturating_sub(stamps.last_read) >= self.expire_after_read;
        written_expired || read_expired
    }
}
