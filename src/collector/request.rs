//! Scrape request and deadline computation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::ScrapeError;

/// Default safety offset subtracted from the caller's timeout (250ms).
pub const DEFAULT_TIMEOUT_OFFSET: Duration = Duration::from_millis(250);

/// Default scrape budget when the caller sends no timeout (10 seconds).
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for budgets built through [`ScrapeRequest::with_budget`] (one day).
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

fn default_timeout_offset() -> Duration {
    DEFAULT_TIMEOUT_OFFSET
}

fn default_scrape_timeout() -> Duration {
    DEFAULT_SCRAPE_TIMEOUT
}

/// Deadline settings shared by all requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSettings {
    /// Subtracted from the caller's timeout to leave room for encoding and
    /// transfer (default: 250ms).
    #[serde(default = "default_timeout_offset", with = "humantime_serde")]
    pub timeout_offset: Duration,

    /// Budget used when the caller sends no timeout (default: 10s).
    #[serde(default = "default_scrape_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout_offset: DEFAULT_TIMEOUT_OFFSET,
            default_timeout: DEFAULT_SCRAPE_TIMEOUT,
        }
    }
}

/// One scrape: what to collect and when to give up.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    target: Option<String>,
    collect: Vec<String>,
    budget: Duration,
    deadline: Instant,
}

impl ScrapeRequest {
    /// Build a request from caller inputs.
    ///
    /// With a caller timeout the deadline is `now + (timeout - offset)`.
    /// Without one the configured default timeout is used unchanged.
    ///
    /// # Errors
    /// - `ScrapeError::InvalidTimeout` if the timeout is not a positive number
    ///   or does not fit the clock.
    /// - `ScrapeError::Configuration` if the offset is not lower than the
    ///   caller's timeout.
    pub fn new(
        target: Option<String>,
        collect: Vec<String>,
        timeout_seconds: Option<f64>,
        settings: &ScrapeSettings,
    ) -> Result<Self, ScrapeError> {
        let budget = match timeout_seconds {
            None => settings.default_timeout,
            Some(seconds) => {
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(ScrapeError::InvalidTimeout(format!(
                        "expected a positive number of seconds, got {seconds}"
                    )));
                }
                let offset = settings.timeout_offset.as_secs_f64();
                if offset >= seconds {
                    return Err(ScrapeError::Configuration(format!(
                        "timeout offset {offset}s must be lower than scrape timeout {seconds}s"
                    )));
                }
                Duration::try_from_secs_f64(seconds - offset).map_err(|e| {
                    ScrapeError::InvalidTimeout(format!("{seconds}s is out of range: {e}"))
                })?
            }
        };

        let deadline = Instant::now().checked_add(budget).ok_or_else(|| {
            ScrapeError::InvalidTimeout(format!("{}s is out of range", budget.as_secs()))
        })?;

        Ok(Self {
            target: target.filter(|t| !t.is_empty()),
            collect,
            budget,
            deadline,
        })
    }

    /// Build a request whose deadline is `budget` from now.
    ///
    /// Budgets past the clock's range are capped at [`MAX_BUDGET`].
    pub fn with_budget(target: Option<String>, collect: Vec<String>, budget: Duration) -> Self {
        let budget = budget.min(MAX_BUDGET);
        Self {
            target: target.filter(|t| !t.is_empty()),
            collect,
            budget,
            deadline: Instant::now() + budget,
        }
    }

    /// Target requested by the caller, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Provider names requested through `collect[]`. Empty means all.
    pub fn collect(&self) -> &[String] {
        &self.collect
    }

    /// Time granted to providers.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Instant at which outstanding providers are cut off.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the provider `name` passes the `collect[]` filter.
    pub fn selects(&self, name: &str) -> bool {
        self.collect.is_empty() || self.collect.iter().any(|c| c == name)
    }
}
