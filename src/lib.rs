//! promcache - Caching Prometheus Exporter Library
//!
//! Serves Prometheus scrapes from a TTL cache that is filled lazily and kept
//! warm in the background, so that expensive or rate-limited upstream
//! sources are queried at a fixed cadence no matter how often they are
//! scraped. The library can be embedded in other Rust projects, or run as a
//! standalone binary with the `promcache` executable.
//!
//! # Architecture
//!
//! - **Cache**: TTL value cache with single-flight loads ([`cache`])
//! - **Refresh**: Fixed-interval background warmer ([`refresh`])
//! - **Providers**: Upstream adapters that pull and emit values ([`provider`])
//! - **Collector**: Deadline-bound concurrent scrape fan-out ([`collector`])
//! - **Exposition**: Prometheus registries and text encoding ([`exposition`])
//! - **Server**: `/metrics` and `/healthz` over axum ([`server`])

pub mod cache;
pub mod collector;
pub mod config;
pub mod exposition;
pub mod provider;
pub mod refresh;
pub mod server;

// Re-export commonly used types
pub use cache::{CacheBuilder, CacheError, CacheLoader, CacheSweeper, MetricCache};
pub use collector::{Collector, ScrapeError, ScrapeOutcome, ScrapeRequest, ScrapeSettings};
pub use config::{AppConfig, ConfigError};
pub use provider::{Emitter, MetricProvider, ProviderError, ProviderLoader, ScrapeContext};
pub use refresh::RefreshScheduler;
