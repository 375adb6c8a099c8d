//! Cache Layer
//!
//! TTL-keyed store of gauge values that shields upstream sources from scrape
//! traffic. Values are loaded lazily through a [`CacheLoader`] and every key
//! has at most one load in flight.
//!
//! # Components
//!
//! - [`MetricCache`]: Cloneable handle to the shared store
//! - [`CacheBuilder`]: TTL and eviction observer configuration
//! - [`CacheLoader`]: Async source of fresh values, called on miss or refresh
//! - [`CacheSweeper`]: Background task removing entries long past expiry
//!
//! # Policies
//!
//! - Freshness is `loaded_at + ttl`. Reads never extend an entry.
//! - Failed loads are not cached; the next access retries.
//! - Loads run on their own task, so a caller that stops waiting does not
//!   abort the upstream pull.

mod error;
mod store;
mod sweeper;

pub use error::{BoxError, CacheError};
pub use store::{
    CacheBuilder, CacheEntry, CacheLoader, DEFAULT_TTL, EvictionObserver, EvictionReason,
    MetricCache,
};
pub use sweeper::{CacheSweeper, DEFAULT_SWEEP_GRACE, DEFAULT_SWEEP_INTERVAL};
