//! Background sweep of expired entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::MetricCache;

/// Default pause between sweeps (1 minute).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default time an entry may sit expired before the sweeper drops it (1 minute).
pub const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(60);

/// Default timeout for sweeper shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the running sweep task.
///
/// Bounds memory for keys that stop being read: expired entries are otherwise
/// only removed when accessed.
#[derive(Debug)]
pub struct CacheSweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// Spawn the sweep loop. The first sweep runs one `interval` after start.
    pub fn start(cache: MetricCache, interval: Duration, grace: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?interval, grace = ?grace, "Cache sweeper started");

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired(grace);
                        if removed > 0 {
                            tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                        }
                    }
                }
            }

            tracing::info!("Cache sweeper stopped");
        });

        Self { token, handle }
    }

    /// Stop the sweeper with the default timeout.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Stop the sweeper, waiting at most `timeout` for the task to exit.
    pub async fn shutdown_with_timeout(self, timeout: Duration) {
        self.token.cancel();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Cache sweeper task failed"),
            Err(_) => tracing::warn!("Cache sweeper shutdown timed out"),
        }
    }
}
