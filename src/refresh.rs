//! Refresh Layer
//!
//! Background warmer for the cache. Each tracked key gets a fixed-interval
//! job that forces a reload so scrapes find fresh values without waiting on
//! the upstream.
//!
//! The scheduler only reduces latency. Correctness never depends on it: a
//! scrape that finds a key missing or expired loads it lazily.

mod scheduler;

pub use scheduler::{
    DEFAULT_REFRESH_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo, MIN_INTERVAL, RefreshError,
    RefreshScheduler, clamp_interval,
};
