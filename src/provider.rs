//! Provider Layer
//!
//! Pluggable metric providers. A provider names itself, owns a set of cache
//! keys, knows how to pull fresh values for those keys from its upstream, and
//! turns cached values into samples during a scrape.
//!
//! # Architecture
//!
//! - [`MetricProvider`]: Core trait implemented by every metric source
//! - [`ProviderLoader`]: Routes cache loads to the provider owning the key
//! - [`Emitter`] / [`Sample`]: Scrape output, one sample per labeled series
//! - [`http::HttpGaugeProvider`]: Gauge pulled from an HTTP endpoint
//!
//! `scrape` never talks to the upstream; only the cache loader calls
//! `pull_external`, either on a miss or on a scheduler refresh.

pub mod http;
mod loader;
mod traits;

pub use loader::ProviderLoader;
pub use traits::{Emitter, MetricProvider, ProviderError, Sample, ScrapeContext};
