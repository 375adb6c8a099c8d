//! Concurrent, deadline-bound provider fan-out.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::MetricCache;
use crate::collector::{ScrapeError, ScrapeRequest};
use crate::provider::{Emitter, MetricProvider, Sample, ScrapeContext};

/// Self-metric label for the whole fan-out.
pub const CONNECTION_LABEL: &str = "connection";

/// Result of one provider within one scrape.
#[derive(Debug)]
pub struct ProviderReport {
    /// Provider name.
    pub provider: String,
    /// Whether the provider finished without error before the deadline.
    pub success: bool,
    /// Time spent on the provider. Capped at the deadline for timeouts.
    pub duration: Duration,
    /// Emitted samples. Always empty for failed providers.
    pub samples: Vec<Sample>,
    /// Failure cause, if any.
    pub error: Option<ScrapeError>,
}

impl ProviderReport {
    fn failed(provider: String, duration: Duration, error: ScrapeError) -> Self {
        Self {
            provider,
            success: false,
            duration,
            samples: Vec::new(),
            error: Some(error),
        }
    }

    /// Self-metric label, `collect.<provider>`.
    pub fn label(&self) -> String {
        format!("collect.{}", self.provider)
    }
}

/// Everything one scrape produced.
#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    /// One report per selected provider, sorted by provider name.
    pub reports: Vec<ProviderReport>,
    /// Wall time of the whole fan-out.
    pub connection_duration: Duration,
}

impl ScrapeOutcome {
    /// Report for the provider `name`.
    pub fn report(&self, name: &str) -> Option<&ProviderReport> {
        self.reports.iter().find(|r| r.provider == name)
    }

    /// All samples from successful providers.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.reports.iter().flat_map(|r| r.samples.iter())
    }

    /// Number of providers that failed.
    pub fn failures(&self) -> usize {
        self.reports.iter().filter(|r| !r.success).count()
    }
}

/// Runs scrapes across a fixed provider set.
pub struct Collector {
    providers: Vec<Arc<dyn MetricProvider>>,
    cache: MetricCache,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("Collector")
            .field("providers", &names)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Collector {
    /// Create a collector scraping `providers` through `cache`.
    pub fn new(providers: Vec<Arc<dyn MetricProvider>>, cache: MetricCache) -> Self {
        Self { providers, cache }
    }

    /// Providers in registration order.
    pub fn providers(&self) -> &[Arc<dyn MetricProvider>] {
        &self.providers
    }

    /// Cache shared by all providers.
    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    /// Providers that pass the request's `collect[]` filter.
    pub fn select(&self, request: &ScrapeRequest) -> Vec<Arc<dyn MetricProvider>> {
        for name in request.collect() {
            if !self.providers.iter().any(|p| p.name() == name) {
                tracing::debug!(collector = %name, "Ignoring unknown collect[] entry");
            }
        }

        self.providers
            .iter()
            .filter(|p| request.selects(p.name()))
            .cloned()
            .collect()
    }

    /// Scrape all selected providers concurrently.
    ///
    /// Returns once every provider reported or the request deadline passed,
    /// whichever comes first. Providers still running at the deadline are
    /// signalled through the scrape context, reported as timed out and left
    /// to finish in the background; their results are discarded.
    pub async fn collect(&self, request: &ScrapeRequest) -> ScrapeOutcome {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let ctx = ScrapeContext::new(request.target().map(str::to_owned), cancel.clone());

        // Keyed by spawn index so providers sharing a name are tracked apart.
        let mut tasks = JoinSet::new();
        let mut pending = BTreeMap::new();
        for (index, provider) in self.select(request).into_iter().enumerate() {
            pending.insert(index, provider.name().to_string());
            let run = run_provider(provider, ctx.clone(), self.cache.clone());
            tasks.spawn(async move { (index, run.await) });
        }

        let mut reports = Vec::with_capacity(pending.len());
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(request.deadline(), tasks.join_next()).await {
                Ok(Some(Ok((index, report)))) => {
                    pending.remove(&index);
                    reports.push(report);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(error = %e, "Provider task failed to join");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    cancel.cancel();
                    tasks.detach_all();
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        for provider in pending.into_values() {
            let error = if deadline_hit {
                tracing::warn!(
                    collector = %provider,
                    budget_ms = request.budget().as_millis(),
                    "Provider did not finish before the scrape deadline"
                );
                ScrapeError::Timeout(elapsed)
            } else {
                ScrapeError::Panicked("provider task ended without a report".to_string())
            };
            reports.push(ProviderReport::failed(provider, elapsed, error));
        }
        reports.sort_by(|a, b| a.provider.cmp(&b.provider));

        let outcome = ScrapeOutcome {
            reports,
            connection_duration: started.elapsed(),
        };
        tracing::debug!(
            providers = outcome.reports.len(),
            failures = outcome.failures(),
            duration_ms = outcome.connection_duration.as_millis(),
            target = ?request.target(),
            "Scrape finished"
        );
        outcome
    }
}

/// Scrape one provider, timing it and capturing its error or panic.
async fn run_provider(
    provider: Arc<dyn MetricProvider>,
    ctx: ScrapeContext,
    cache: MetricCache,
) -> ProviderReport {
    let name = provider.name().to_string();
    let started = Instant::now();
    let mut emitter = Emitter::new();

    let result = {
        let scrape = AssertUnwindSafe(provider.scrape(&ctx, &cache, &mut emitter)).catch_unwind();
        tokio::select! {
            outcome = scrape => match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ScrapeError::Provider(e)),
                Err(panic) => Err(ScrapeError::Panicked(panic_message(panic.as_ref()))),
            },
            _ = ctx.cancelled() => Err(ScrapeError::Timeout(started.elapsed())),
        }
    };

    let duration = started.elapsed();
    match result {
        Ok(()) => {
            tracing::debug!(collector = %name, samples = emitter.len(), duration_ms = duration.as_millis(), "Provider scraped");
            ProviderReport {
                provider: name,
                success: true,
                duration,
                samples: emitter.into_samples(),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(collector = %name, error = %e, "Error from provider");
            ProviderReport::failed(name, duration, e)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBuilder;
    use crate::provider::{ProviderError, ProviderLoader};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider with one key and a simulated upstream.
    struct FakeProvider {
        name: String,
        key: String,
        pull_delay: Duration,
        fail: bool,
        pulls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &str, pull_delay: Duration, fail: bool) -> Arc<Self> {
            Self::with_key(name, &format!("fake.{name}"), pull_delay, fail)
        }

        fn with_key(name: &str, key: &str, pull_delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                key: key.to_string(),
                pull_delay,
                fail,
                pulls: AtomicUsize::new(0),
            })
        }

        fn key(&self) -> String {
            self.key.clone()
        }
    }

    #[async_trait::async_trait]
    impl MetricProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn help(&self) -> &str {
            "fake provider"
        }

        fn cache_keys(&self) -> Vec<String> {
            vec![self.key()]
        }

        async fn scrape(
            &self,
            _ctx: &ScrapeContext,
            cache: &MetricCache,
            emitter: &mut Emitter,
        ) -> Result<(), ProviderError> {
            let value = cache.get(&self.key()).await?;
            emitter.gauge(format!("{}_value", self.name), self.help(), &[], value);
            Ok(())
        }

        async fn pull_external(&self, _key: &str) -> Result<f64, ProviderError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.pull_delay).await;
            if self.fail {
                return Err(ProviderError::Upstream("connection refused".to_string()));
            }
            Ok(self.name.len() as f64)
        }
    }

    struct PanickingProvider;

    #[async_trait::async_trait]
    impl MetricProvider for PanickingProvider {
        fn name(&self) -> &str {
            "panicky"
        }

        fn help(&self) -> &str {
            "always panics"
        }

        fn cache_keys(&self) -> Vec<String> {
            Vec::new()
        }

        async fn scrape(
            &self,
            _ctx: &ScrapeContext,
            _cache: &MetricCache,
            _emitter: &mut Emitter,
        ) -> Result<(), ProviderError> {
            panic!("scrape bug");
        }

        async fn pull_external(&self, _key: &str) -> Result<f64, ProviderError> {
            Err(ProviderError::Internal("no keys".to_string()))
        }
    }

    fn collector(providers: Vec<Arc<dyn MetricProvider>>) -> Collector {
        let loader = ProviderLoader::new(&providers).unwrap();
        let cache = CacheBuilder::new(Arc::new(loader)).build();
        Collector::new(providers, cache)
    }

    fn request(budget_ms: u64) -> ScrapeRequest {
        ScrapeRequest::with_budget(None, Vec::new(), Duration::from_millis(budget_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_provider_is_isolated() {
        let collector = collector(vec![
            FakeProvider::new("alpha", Duration::from_millis(20), false),
            FakeProvider::new("broken", Duration::ZERO, true),
            FakeProvider::new("gamma", Duration::from_millis(20), false),
        ]);

        let started = Instant::now();
        let outcome = collector.collect(&request(5_000)).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.report("alpha").unwrap().success);
        assert!(outcome.report("gamma").unwrap().success);

        let broken = outcome.report("broken").unwrap();
        assert!(!broken.success);
        assert!(broken.samples.is_empty());
        assert!(matches!(
            broken.error,
            Some(ScrapeError::Provider(ProviderError::Cache(_)))
        ));

        let values: Vec<(String, f64)> = outcome
            .samples()
            .map(|s| (s.name.clone(), s.value))
            .collect();
        assert_eq!(
            values,
            vec![("alpha_value".to_string(), 5.0), ("gamma_value".to_string(), 5.0)]
        );

        // Providers ran concurrently; the failure added nothing.
        assert!(elapsed < Duration::from_millis(40), "took {elapsed:?}");
        assert_eq!(outcome.failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_slow_provider() {
        let slow = FakeProvider::new("slow", Duration::from_millis(500), false);
        let collector = collector(vec![
            slow.clone(),
            FakeProvider::new("fast", Duration::from_millis(5), false),
        ]);

        let started = Instant::now();
        let outcome = collector.collect(&request(50)).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");

        let slow_report = outcome.report("slow").unwrap();
        assert!(!slow_report.success);
        assert!(matches!(slow_report.error, Some(ScrapeError::Timeout(_))));
        assert!(outcome.report("fast").unwrap().success);

        // The abandoned pull still lands in the cache for the next scrape.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(collector.cache().entry("fake.slow").map(|e| e.value), Some(4.0));
        assert_eq!(slow.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_named_providers_are_reported_separately() {
        let collector = collector(vec![
            FakeProvider::with_key("volumes", "volumes.east", Duration::from_millis(5), false),
            FakeProvider::with_key("volumes", "volumes.west", Duration::from_millis(500), false),
        ]);

        let outcome = collector.collect(&request(50)).await;

        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome.reports.iter().all(|r| r.provider == "volumes"));
        assert_eq!(outcome.reports.iter().filter(|r| r.success).count(), 1);
        let timed_out: Vec<_> = outcome
            .reports
            .iter()
            .filter(|r| matches!(r.error, Some(ScrapeError::Timeout(_))))
            .collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(outcome.failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_cache_skips_upstream() {
        let provider = FakeProvider::new("warm", Duration::from_millis(10), false);
        let collector = collector(vec![provider.clone()]);

        for _ in 0..3 {
            let outcome = collector.collect(&request(1_000)).await;
            assert!(outcome.report("warm").unwrap().success);
        }
        assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_scrapes_share_one_pull() {
        let provider = FakeProvider::new("shared", Duration::from_millis(100), false);
        let collector = Arc::new(collector(vec![provider.clone()]));

        let scrapes: Vec<_> = (0..5)
            .map(|_| {
                let collector = Arc::clone(&collector);
                tokio::spawn(async move { collector.collect(&request(1_000)).await })
            })
            .collect();

        for scrape in futures::future::join_all(scrapes).await {
            assert!(scrape.unwrap().report("shared").unwrap().success);
        }
        assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_provider_is_isolated() {
        let collector = collector(vec![
            Arc::new(PanickingProvider),
            FakeProvider::new("steady", Duration::ZERO, false),
        ]);

        let outcome = collector.collect(&request(1_000)).await;

        let panicky = outcome.report("panicky").unwrap();
        assert!(!panicky.success);
        assert!(matches!(panicky.error, Some(ScrapeError::Panicked(ref m)) if m == "scrape bug"));
        assert!(outcome.report("steady").unwrap().success);
    }

    #[tokio::test]
    async fn test_collect_filter_limits_providers() {
        let collector = collector(vec![
            FakeProvider::new("alpha", Duration::ZERO, false),
            FakeProvider::new("beta", Duration::ZERO, false),
        ]);
        let request = ScrapeRequest::with_budget(
            None,
            vec!["beta".to_string(), "unknown".to_string()],
            Duration::from_secs(1),
        );

        let outcome = collector.collect(&request).await;

        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].provider, "beta");
        assert_eq!(outcome.reports[0].label(), "collect.beta");
    }

    #[tokio::test]
    async fn test_no_providers() {
        let collector = collector(Vec::new());
        let outcome = collector.collect(&request(1_000)).await;
        assert!(outcome.reports.is_empty());
    }
}
