//! Loading Cache - A concurrent in-process read-through/write-through cache
//!
//! Provides per-key lazy loading with at most one in-flight load per key,
//! write- and read-based expiration, background refresh-ahead and a periodic
//! sweep of expired entries.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{CacheBuilder, CacheStats, LoadingCache, RemovalCause, SubscriptionId};
pub use config::CacheOptions;
pub use error::{CacheError, Result};
