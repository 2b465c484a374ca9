//! Cache Module
//!
//! Concurrent loading cache with per-key loads, time-based expiration,
//! refresh-ahead and removal notifications.

mod builder;
mod entry;
mod notify;
mod policy;
mod stats;
mod store;
mod traits;


// Re-export public types
pub use builder::CacheBuilder;
pub use notify::{RemovalCause, RemovalListener, SubscriptionId};
pub use policy::{Clock, ExpirationPolicy, Timestamps};
pub use stats::CacheStats;
pub use store::LoadingCache;
pub use traits::{loader_fn, CacheKey, CacheValue, Loader};

pub(crate) use entry::CacheEntry;
pub(crate) use store::Inner;
