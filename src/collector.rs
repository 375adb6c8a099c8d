//! Collector Layer
//!
//! Deadline-bound scrape orchestration. Each scrape fans out one task per
//! selected provider, waits for all of them or for the request deadline, and
//! reports per-provider success and duration next to the emitted samples.
//!
//! # Architecture
//!
//! - [`ScrapeRequest`]: Target, `collect[]` filter and absolute deadline
//! - [`Collector`]: Concurrent fan-out across providers
//! - [`ScrapeOutcome`] / [`ProviderReport`]: Per-provider results
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use promcache::cache::CacheBuilder;
//! use promcache::collector::{Collector, ScrapeRequest, ScrapeSettings};
//! use promcache::provider::{MetricProvider, ProviderLoader};
//!
//! # async fn run(providers: Vec<Arc<dyn MetricProvider>>) -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ProviderLoader::new(&providers)?;
//! let cache = CacheBuilder::new(Arc::new(loader)).build();
//! let collector = Collector::new(providers, cache);
//!
//! let request = ScrapeRequest::new(None, Vec::new(), Some(10.0), &ScrapeSettings::default())?;
//! let outcome = collector.collect(&request).await;
//! println!("{} providers reported", outcome.reports.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod exporter;
mod request;

pub use error::ScrapeError;
pub use exporter::{CONNECTION_LABEL, Collector, ProviderReport, ScrapeOutcome};
pub use request::{
    DEFAULT_SCRAPE_TIMEOUT, DEFAULT_TIMEOUT_OFFSET, MAX_BUDGET, ScrapeRequest, ScrapeSettings,
};
