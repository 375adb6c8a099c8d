//! Scrape error types.

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors that can occur while serving a scrape.
///
/// Only `Configuration` and `InvalidTimeout` fail a whole request; the other
/// variants are recorded per provider and surface as `collector_success 0`.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Deadline passed before the provider finished.
    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),

    /// Exporter configuration leaves no time to scrape.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied timeout is unusable.
    #[error("invalid scrape timeout: {0}")]
    InvalidTimeout(String),

    /// Provider scrape returned an error.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Provider scrape panicked.
    #[error("provider panicked: {0}")]
    Panicked(String),
}
