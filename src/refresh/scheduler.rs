//! Refresh scheduler managing one job per cache key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::MetricCache;

/// Minimum allowed refresh interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default refresh interval (30 seconds).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while managing refresh jobs.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Key already has a refresh job.
    #[error("key '{0}' is already tracked")]
    DuplicateKey(String),

    /// Key has no refresh job.
    #[error("key '{0}' is not tracked")]
    NotFound(String),
}

/// Clamp a refresh interval to [`MIN_INTERVAL`].
pub fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        tracing::warn!(min_interval = ?MIN_INTERVAL,
            "Refresh interval is less than minimum allowed. Using minimum duration."
        );
        MIN_INTERVAL
    } else {
        interval
    }
}

/// Metadata about a tracked key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// Cache key refreshed by the job.
    pub key: String,
    /// Time between refreshes.
    pub interval: Duration,
}

struct Job {
    info: JobInfo,
    token: CancellationToken,
}

/// Scheduler keeping tracked cache keys warm.
///
/// Jobs tick at a fixed interval with no backoff. A failed refresh keeps the
/// previously cached value and the next tick simply tries again.
pub struct RefreshScheduler {
    cache: MetricCache,
    root: CancellationToken,
    jobs: RwLock<HashMap<String, Job>>,
    tasks: Mutex<JoinSet<()>>,
    started: AtomicBool,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    /// Create a scheduler refreshing keys of `cache`.
    pub fn new(cache: MetricCache) -> Self {
        Self {
            cache,
            root: CancellationToken::new(),
            jobs: RwLock::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Track `key`, refreshing it every `interval`.
    ///
    /// Keys tracked after [`start`](Self::start) begin ticking immediately.
    pub async fn track(
        &self,
        key: impl Into<String>,
        interval: Duration,
    ) -> Result<(), RefreshError> {
        let key = key.into();
        let interval = clamp_interval(interval);
        if interval > self.cache.ttl() {
            tracing::warn!(
                key = %key,
                interval = ?interval,
                ttl = ?self.cache.ttl(),
                "Refresh interval exceeds cache TTL; entries will expire between refreshes"
            );
        }

        let info = JobInfo {
            key: key.clone(),
            interval,
        };
        let token = self.root.child_token();

        // `started` is read under the write lock so `start` and `track` never
        // both spawn the same job.
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&key) {
            return Err(RefreshError::DuplicateKey(key));
        }
        jobs.insert(
            key.clone(),
            Job {
                info: info.clone(),
                token: token.clone(),
            },
        );
        if self.started.load(Ordering::SeqCst) {
            self.spawn_job(info, token).await;
        }
        drop(jobs);

        tracing::info!(key = %key, interval = ?interval, "Refresh job registered");
        Ok(())
    }

    /// Start ticking all tracked keys. Calling it twice is a no-op.
    pub async fn start(&self) {
        let jobs = self.jobs.write().await;
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        for job in jobs.values() {
            self.spawn_job(job.info.clone(), job.token.clone()).await;
        }
        drop(jobs);
        tracing::info!("Refresh scheduler started");
    }

    /// Stop refreshing `key`.
    pub async fn remove(&self, key: &str) -> Result<(), RefreshError> {
        let job = self
            .jobs
            .write()
            .await
            .remove(key)
            .ok_or_else(|| RefreshError::NotFound(key.to_string()))?;

        job.token.cancel();
        Self::reap(&mut *self.tasks.lock().await);
        tracing::info!(key = %key, "Refresh job removed");
        Ok(())
    }

    /// List tracked keys, sorted by key.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .jobs
            .read()
            .await
            .values()
            .map(|j| j.info.clone())
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        jobs
    }

    /// Number of tracked keys.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Shutdown with custom timeout.
    ///
    /// Jobs stop at their next await point; a refresh still in flight keeps
    /// running inside the cache and is not waited for.
    pub async fn shutdown_with_timeout(self, timeout: Duration) {
        let job_count = self.jobs.read().await.len();
        self.root.cancel();

        let mut tasks = self.tasks.into_inner();
        let drained = tokio::time::timeout(timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    tracing::error!(error = %e, "Refresh job task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(job_count, "Refresh scheduler shutdown timed out");
            tasks.abort_all();
        } else {
            tracing::info!(job_count, "Refresh scheduler shutdown complete");
        }
    }

    async fn spawn_job(&self, info: JobInfo, token: CancellationToken) {
        let cache = self.cache.clone();
        let mut tasks = self.tasks.lock().await;
        Self::reap(&mut tasks);
        tasks.spawn(run_job(cache, info, token));
    }

    /// Drop finished tasks, such as those of removed jobs.
    fn reap(tasks: &mut JoinSet<()>) {
        while let Some(res) = tasks.try_join_next() {
            if let Err(e) = res {
                tracing::error!(error = %e, "Refresh job task failed");
            }
        }
    }

    /// Number of job tasks still running.
    #[cfg(test)]
    async fn running_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        Self::reap(&mut tasks);
        tasks.len()
    }
}

/// Tick loop for one key. The first refresh happens one interval after spawn.
async fn run_job(cache: MetricCache, info: JobInfo, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + info.interval, info.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = token.cancelled() => break,
            result = cache.refresh(&info.key) => match result {
                Ok(value) => {
                    let expires_in = cache
                        .entry(&info.key)
                        .map(|e| e.expires_at.saturating_duration_since(Instant::now()));
                    tracing::debug!(key = %info.key, value, expires_in = ?expires_in, "Refreshed cache entry");
                }
                Err(e) => {
                    tracing::warn!(key = %info.key, error = %e, "Refresh failed, keeping previous value");
                }
            },
        }
    }

    tracing::debug!(key = %info.key, "Refresh job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BoxError, CacheBuilder, CacheLoader};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct MockLoader {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl MockLoader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl CacheLoader for MockLoader {
        async fn load(&self, _key: &str) -> Result<f64, BoxError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err("upstream unavailable".into());
            }
            Ok(call as f64)
        }
    }

    fn cache(loader: Arc<MockLoader>) -> MetricCache {
        CacheBuilder::new(loader)
            .ttl(Duration::from_secs(30 * 60))
            .build()
    }

    #[test]
    fn test_interval_minimum() {
        assert_eq!(clamp_interval(Duration::from_millis(100)), MIN_INTERVAL);
        assert_eq!(
            clamp_interval(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle() {
        let scheduler = RefreshScheduler::new(cache(MockLoader::new()));

        scheduler.track("b", Duration::from_secs(60)).await.unwrap();
        scheduler.track("a", Duration::from_secs(30)).await.unwrap();
        assert_eq!(scheduler.job_count().await, 2);

        let err = scheduler.track("a", Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, RefreshError::DuplicateKey(_)));

        let jobs = scheduler.list_jobs().await;
        assert_eq!(jobs[0].key, "a");
        assert_eq!(jobs[1].interval, Duration::from_secs(60));

        scheduler.remove("a").await.unwrap();
        assert_eq!(scheduler.job_count().await, 1);
        assert!(matches!(
            scheduler.remove("a").await,
            Err(RefreshError::NotFound(_))
        ));

        scheduler.start().await;
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_refresh_without_traffic() {
        let loader = MockLoader::new();
        let cache = cache(loader.clone());
        let scheduler = RefreshScheduler::new(cache.clone());

        scheduler.track("k", Duration::from_secs(30)).await.unwrap();
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(loader.calls(), 0);

        tokio::time::sleep(Duration::from_secs(66)).await;
        assert_eq!(loader.calls(), 3);
        assert_eq!(cache.entry("k").unwrap().value, 3.0);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_previous_value() {
        let loader = MockLoader::new();
        let cache = cache(loader.clone());
        cache.get("k").await.unwrap();

        let scheduler = RefreshScheduler::new(cache.clone());
        scheduler.track("k", Duration::from_secs(30)).await.unwrap();
        scheduler.start().await;

        loader.failing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(65)).await;

        // Two failed ticks, no backoff, value untouched.
        assert_eq!(loader.calls(), 3);
        assert_eq!(cache.entry("k").unwrap().value, 1.0);

        loader.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.entry("k").unwrap().value, 4.0);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_after_start_and_shutdown_stops_ticks() {
        let loader = MockLoader::new();
        let scheduler = RefreshScheduler::new(cache(loader.clone()));
        scheduler.start().await;

        scheduler.track("late", Duration::from_secs(10)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(loader.calls(), 1);

        scheduler.shutdown_with_timeout(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_job_stops_ticking() {
        let loader = MockLoader::new();
        let scheduler = RefreshScheduler::new(cache(loader.clone()));
        scheduler.track("k", Duration::from_secs(10)).await.unwrap();
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.remove("k").await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(loader.calls(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_racing_start_spawns_each_job_once() {
        let scheduler = RefreshScheduler::new(cache(MockLoader::new()));

        let tracking = async {
            for i in 0..32 {
                scheduler
                    .track(format!("key-{i}"), Duration::from_secs(30))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        };
        let starting = async {
            tokio::task::yield_now().await;
            scheduler.start().await;
        };
        tokio::join!(tracking, starting);

        assert_eq!(scheduler.job_count().await, 32);
        assert_eq!(scheduler.running_tasks().await, 32);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_job_tasks_are_reaped() {
        let scheduler = RefreshScheduler::new(cache(MockLoader::new()));
        scheduler.track("a", Duration::from_secs(30)).await.unwrap();
        scheduler.track("b", Duration::from_secs(30)).await.unwrap();
        scheduler.start().await;

        scheduler.remove("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(scheduler.running_tasks().await, 1);
        scheduler.shutdown().await;
    }
}
