//! Configuration Module
//!
//! Immutable cache options, loadable from environment variables or built fluently.

use std::env;
use std::time::Duration;

/// Scan interval used when expiration is enabled but no interval was given.
pub const DEFAULT_EXPIRATION_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Cache configuration parameters.
///
/// A zero duration disables the corresponding feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Expected number of concurrently writing tasks (map sharding hint)
    pub concurrency_level: usize,
    /// Initial map capacity hint
    pub initial_capacity: usize,
    /// Reload entries in the background this long after their last write
    pub refresh_after_write: Duration,
    /// Entries become stale this long after their last write
    pub expire_after_write: Duration,
    /// Entries become stale this long after their last read
    pub expire_after_read: Duration,
    /// Interval between background sweeps of expired entries
    pub expiration_scan_interval: Duration,
}

impl CacheOptions {
    /// Creates a new CacheOptions by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CONCURRENCY_LEVEL` - Sharding hint (default: 4 x available cores)
    /// - `CACHE_INITIAL_CAPACITY` - Initial capacity (default: 0)
    /// - `CACHE_REFRESH_AFTER_WRITE_MS` - Refresh delay (default: disabled)
    /// - `CACHE_EXPIRE_AFTER_WRITE_MS` - Write TTL (default: disabled)
    /// - `CACHE_EXPIRE_AFTER_READ_MS` - Read TTL (default: disabled)
    /// - `CACHE_EXPIRATION_SCAN_INTERVAL_MS` - Sweep interval (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency_level: env_parse("CACHE_CONCURRENCY_LEVEL")
                .unwrap_or(defaults.concurrency_level),
            initial_capacity: env_parse("CACHE_INITIAL_CAPACITY")
                .unwrap_or(defaults.initial_capacity),
            refresh_after_write: env_millis("CACHE_REFRESH_AFTER_WRITE_MS")
                .unwrap_or(defaults.refresh_after_write),
            expire_after_write: env_millis("CACHE_EXPIRE_AFTER_WRITE_MS")
                .unwrap_or(defaults.expire_after_write),
            expire_after_read: env_millis("CACHE_EXPIRE_AFTER_READ_MS")
                .unwrap_or(defaults.expire_after_read),
            expiration_scan_interval: env_millis("CACHE_EXPIRATION_SCAN_INTERVAL_MS")
                .unwrap_or(defaults.expiration_scan_interval),
        }
    }

    pub fn with_concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = level;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_refresh_after_write(mut self, after: Duration) -> Self {
        self.refresh_after_write = after;
        self
    }

    pub fn with_expire_after_write(mut self, after: Duration) -> Self {
        self.expire_after_write = after;
        self
    }

    pub fn with_expire_after_read(mut self, after: Duration) -> Self {
        self.expire_after_read = after;
        self
    }

    pub fn with_expiration_scan_interval(mut self, interval: Duration) -> Self {
        self.expiration_scan_interval = interval;
        self
    }

    // == Derived Settings ==
    /// Returns true if either expiration duration is configured.
    pub fn expires(&self) -> bool {
        !self.expire_after_write.is_zero() || !self.expire_after_read.is_zero()
    }

    /// Sweep interval, falling back to the default when unset.
    pub fn effective_scan_interval(&self) -> Duration {
        if self.expiration_scan_interval.is_zero() {
            DEFAULT_EXPIRATION_SCAN_INTERVAL
        } else {
            self.expiration_scan_interval
        }
    }

    /// Shard count for the underlying map.
    ///
    /// The map requires a power of two greater than one.
    pub fn shard_amount(&self) -> usize {
        self.concurrency_level.max(2).next_power_of_two()
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency_level: cores * 4,
            initial_capacity: 0,
            refresh_after_write: Duration::ZERO,
            expire_after_write: Duration::ZERO,
            expire_after_read: Duration::ZERO,
            expiration_scan_interval: DEFAULT_EXPIRATION_SCAN_INTERVAL,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = CacheOptions::default();
        assert_eq!(options.initial_capacity, 0);
        assert!(options.refresh_after_write.is_zero());
        assert!(!options.expires());
        assert_eq!(
            options.expiration_scan_interval,
            DEFAULT_EXPIRATION_SCAN_INTERVAL
        );
    }

    #[test]
    fn test_options_from_env() {
        env::set_var("CACHE_EXPIRE_AFTER_WRITE_MS", "250");
        env::set_var("CACHE_INITIAL_CAPACITY", "not-a-number");
        env::remove_var("CACHE_EXPIRE_AFTER_READ_MS");

        let options = CacheOptions::from_env();
        assert_eq!(options.expire_after_write, Duration::from_millis(250));
        assert_eq!(options.initial_capacity, 0);
        assert!(options.expire_after_read.is_zero());
        assert!(options.expires());

        env::remove_var("CACHE_EXPIRE_AFTER_WRITE_MS");
        env::remove_var("CACHE_INITIAL_CAPACITY");
    }

    #[test]
    fn test_shard_amount_is_power_of_two() {
        let options = CacheOptions::default().with_concurrency_level(0);
        assert_eq!(options.shard_amount(), 2);

        let options = options.with_concurrency_level(5);
        assert_eq!(options.shard_amount(), 8);

        let options = options.with_concurrency_level(16);
        assert_eq!(options.shard_amount(), 16);
    }

    #[test]
    fn test_effective_scan_interval() {
        let options = CacheOptions::default().with_expiration_scan_interval(Duration::ZERO);
        assert_eq!(
            options.effective_scan_interval(),
            DEFAULT_EXPIRATION_SCAN_INTERVAL
        );

        let options = options.with_expiration_scan_interval(Duration::from_millis(50));
        assert_eq!(options.effective_scan_interval(), Duration::from_millis(50));
    }
}
