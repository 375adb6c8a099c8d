//! Core provider trait and scrape types.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheError, MetricCache};

/// Errors raised by providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Reading the cache failed, usually because the upstream pull failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Upstream answered with something unusable.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// HTTP transport or status error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Two providers claim the same cache key.
    #[error("cache key '{key}' claimed by both '{first}' and '{second}'")]
    DuplicateKey {
        key: String,
        first: String,
        second: String,
    },

    /// Scrape logic fault unrelated to fetching data.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Request-scoped inputs handed to [`MetricProvider::scrape`].
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    target: Option<String>,
    cancel: CancellationToken,
}

impl ScrapeContext {
    /// Create a context for one scrape.
    pub fn new(target: Option<String>, cancel: CancellationToken) -> Self {
        Self { target, cancel }
    }

    /// Target requested by the caller, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether the scrape deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the scrape deadline passes.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// One labeled gauge value produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Fully qualified metric name.
    pub name: String,
    /// Help text.
    pub help: String,
    /// Label pairs in declaration order.
    pub labels: Vec<(String, String)>,
    /// Gauge value.
    pub value: f64,
}

/// Collects samples emitted by a provider, in call order.
#[derive(Debug, Default)]
pub struct Emitter {
    samples: Vec<Sample>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a gauge value.
    pub fn gauge(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        labels: &[(&str, &str)],
        value: f64,
    ) {
        self.samples.push(Sample {
            name: name.into(),
            help: help.into(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            value,
        });
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A metric source.
///
/// Providers are constructed once at startup and are immutable afterwards;
/// the only state shared between scrapes is the cache.
///
/// # Contract
///
/// - [`name`](Self::name) is unique across the process and is used for the
///   `collect[]` filter and the `collect.<name>` self-metric label.
/// - [`scrape`](Self::scrape) reads values through the cache only and may
///   emit zero, one or many series.
/// - [`pull_external`](Self::pull_external) performs the upstream call for
///   one of the keys listed by [`cache_keys`](Self::cache_keys). It must be
///   idempotent and safe to call from a background task.
#[async_trait::async_trait]
pub trait MetricProvider: Send + Sync + 'static {
    /// Unique provider name.
    fn name(&self) -> &str;

    /// Human-readable description of what the provider exports.
    fn help(&self) -> &str;

    /// Cache keys this provider owns and can load.
    fn cache_keys(&self) -> Vec<String>;

    /// Read cached values and emit samples.
    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        cache: &MetricCache,
        emitter: &mut Emitter,
    ) -> Result<(), ProviderError>;

    /// Fetch a fresh value for `key` from the upstream source.
    async fn pull_external(&self, key: &str) -> Result<f64, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_preserves_call_order() {
        let mut emitter = Emitter::new();
        emitter.gauge("b_metric", "second", &[("zone", "a")], 2.0);
        emitter.gauge("a_metric", "first", &[], 1.0);

        let names: Vec<_> = emitter.samples().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b_metric", "a_metric"]);
        assert_eq!(
            emitter.samples()[0].labels,
            vec![("zone".to_string(), "a".to_string())]
        );
        assert_eq!(emitter.len(), 2);
    }

    #[test]
    fn test_scrape_context_cancellation() {
        let token = CancellationToken::new();
        let ctx = ScrapeContext::new(Some("db-1".to_string()), token.clone());

        assert_eq!(ctx.target(), Some("db-1"));
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
