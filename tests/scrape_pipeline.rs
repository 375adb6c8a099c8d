//! End-to-end scrape pipeline tests on paused time.
//!
//! The upstream is pulled at the refresh cadence, never at the scrape
//! cadence: first access loads lazily, later scrapes are served from cache
//! and the scheduler keeps values fresh in the background.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use promcache::cache::{CacheBuilder, CacheSweeper, MetricCache};
use promcache::collector::{Collector, ScrapeRequest, ScrapeSettings};
use promcache::provider::{
    Emitter, MetricProvider, ProviderError, ProviderLoader, ScrapeContext,
};
use promcache::refresh::RefreshScheduler;

const TTL: Duration = Duration::from_secs(30 * 60);
const REFRESH: Duration = Duration::from_secs(30);

/// Counts upstream pulls and returns the pull number as the value.
struct CountingProvider {
    pulls: AtomicUsize,
}

#[async_trait::async_trait]
impl MetricProvider for CountingProvider {
    fn name(&self) -> &str {
        "ebs_volume_count"
    }

    fn help(&self) -> &str {
        "The total number of EBS volumes in account"
    }

    fn cache_keys(&self) -> Vec<String> {
        vec!["volumes".to_string()]
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        cache: &MetricCache,
        emitter: &mut Emitter,
    ) -> Result<(), ProviderError> {
        let value = cache.get("volumes").await?;
        emitter.gauge("aws_ebs_volume_count", self.help(), &[], value);
        Ok(())
    }

    async fn pull_external(&self, _key: &str) -> Result<f64, ProviderError> {
        let pull = self.pulls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(pull as f64)
    }
}

fn setup() -> (Arc<CountingProvider>, Collector) {
    let provider = Arc::new(CountingProvider {
        pulls: AtomicUsize::new(0),
    });
    let providers: Vec<Arc<dyn MetricProvider>> = vec![provider.clone()];
    let loader = ProviderLoader::new(&providers).unwrap();
    let cache = CacheBuilder::new(Arc::new(loader)).ttl(TTL).build();
    (provider, Collector::new(providers, cache))
}

async fn scrape_value(collector: &Collector) -> f64 {
    let request =
        ScrapeRequest::new(None, Vec::new(), Some(10.0), &ScrapeSettings::default()).unwrap();
    let outcome = collector.collect(&request).await;
    let report = outcome.report("ebs_volume_count").unwrap();
    assert!(report.success, "scrape failed: {:?}", report.error);
    report.samples[0].value
}

#[tokio::test(start_paused = true)]
async fn test_upstream_follows_refresh_cadence() {
    let (provider, collector) = setup();
    let scheduler = RefreshScheduler::new(collector.cache().clone());
    scheduler.track("volumes", REFRESH).await.unwrap();
    scheduler.start().await;

    // First scrape loads lazily.
    assert_eq!(scrape_value(&collector).await, 1.0);
    assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);

    // Scrapes every 5s between refreshes never reach the upstream.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scrape_value(&collector).await, 1.0);
    }
    assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);

    // The scheduler refreshes at 30s; scrapes see the new value.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(provider.pulls.load(Ordering::SeqCst), 2);
    assert_eq!(scrape_value(&collector).await, 2.0);

    // Ten more minutes of scraping every 15s costs exactly one pull per tick.
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_secs(15)).await;
        scrape_value(&collector).await;
    }
    assert_eq!(provider.pulls.load(Ordering::SeqCst), 22);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_without_scheduler_values_live_for_ttl() {
    let (provider, collector) = setup();

    assert_eq!(scrape_value(&collector).await, 1.0);

    tokio::time::sleep(TTL - Duration::from_secs(1)).await;
    assert_eq!(scrape_value(&collector).await, 1.0);
    assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);

    // Reads do not extend the lifetime; the next scrape after expiry reloads.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(scrape_value(&collector).await, 2.0);
    assert_eq!(provider.pulls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_drops_abandoned_entries() {
    let (_provider, collector) = setup();
    let cache = collector.cache().clone();
    let sweeper = CacheSweeper::start(cache.clone(), Duration::from_secs(60), Duration::from_secs(60));

    scrape_value(&collector).await;
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(TTL + Duration::from_secs(30)).await;
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(cache.is_empty());

    sweeper.shutdown().await;
}
