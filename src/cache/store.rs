//! TTL store with single-flight loading.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use super::error::{BoxError, CacheError};

/// Default time-to-live for cached values (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Stand-in expiry for TTLs beyond the clock's range (30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Source of fresh values for the cache.
///
/// Called on a cold or expired key, and on forced refresh. Implementations
/// must be safe to retry: a failed load is never cached and the next access
/// calls the loader again.
#[async_trait::async_trait]
pub trait CacheLoader: Send + Sync + 'static {
    /// Produce the current value for `key`.
    ///
    /// Returning a boxed [`CacheError`] passes it through to callers as-is;
    /// any other error is wrapped in [`CacheError::Load`].
    async fn load(&self, key: &str) -> Result<f64, BoxError>;
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Found expired on access.
    Expired,
    /// Removed by the background sweeper.
    Swept,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => f.write_str("expired"),
            Self::Swept => f.write_str("swept"),
        }
    }
}

/// Callback notified of evictions. Diagnostics only.
pub type EvictionObserver = Arc<dyn Fn(&str, EvictionReason) + Send + Sync>;

/// Snapshot of one cached value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Cached value.
    pub value: f64,
    /// When the load that produced this value completed.
    pub loaded_at: Instant,
    /// `loaded_at + ttl`. Never moved by reads.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Whether the entry is stale at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<f64, CacheError>>>;

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, SharedLoad>,
}

struct Inner {
    ttl: Duration,
    loader: Arc<dyn CacheLoader>,
    observer: Option<EvictionObserver>,
    state: Mutex<State>,
}

impl Inner {
    // The lock guards plain maps and is never held across an await, so a
    // poisoned guard still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: &str, reason: EvictionReason) {
        if let Some(observer) = &self.observer {
            observer(key, reason);
        }
    }

    async fn run_load(self: Arc<Self>, key: String) -> Result<f64, CacheError> {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.loader.load(&key))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(match err.downcast::<CacheError>() {
                Ok(cache_err) => *cache_err,
                Err(err) => CacheError::Load {
                    key: key.clone(),
                    message: err.to_string().into(),
                },
            }),
            Err(_) => Err(CacheError::Aborted(key.clone())),
        };

        {
            let mut state = self.lock();
            state.in_flight.remove(&key);
            if let Ok(value) = &result {
                let value = *value;
                let now = Instant::now();
                state.entries.insert(
                    key.clone(),
                    CacheEntry {
                        key: key.clone(),
                        value,
                        loaded_at: now,
                        expires_at: now
                            .checked_add(self.ttl)
                            .unwrap_or_else(|| now + FAR_FUTURE),
                    },
                );
            }
        }

        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(value) => tracing::debug!(key = %key, value, elapsed_ms, "Cache entry loaded"),
            Err(e) => tracing::warn!(key = %key, error = %e, elapsed_ms, "Cache load failed"),
        }
        result
    }
}

/// Builder for [`MetricCache`].
pub struct CacheBuilder {
    loader: Arc<dyn CacheLoader>,
    ttl: Duration,
    observer: Option<EvictionObserver>,
}

impl CacheBuilder {
    /// Create a builder around the loader used for every key.
    pub fn new(loader: Arc<dyn CacheLoader>) -> Self {
        Self {
            loader,
            ttl: DEFAULT_TTL,
            observer: None,
        }
    }

    /// Set the time-to-live applied to every loaded value.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register an eviction observer.
    ///
    /// The observer runs outside the cache lock and must not block.
    pub fn on_eviction(
        mut self,
        observer: impl Fn(&str, EvictionReason) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Build the cache.
    pub fn build(self) -> MetricCache {
        MetricCache {
            inner: Arc::new(Inner {
                ttl: self.ttl,
                loader: self.loader,
                observer: self.observer,
                state: Mutex::new(State::default()),
            }),
        }
    }
}

/// Shared TTL cache of gauge values.
///
/// Cloning is cheap; all clones share one store.
#[derive(Clone)]
pub struct MetricCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MetricCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MetricCache")
            .field("ttl", &self.inner.ttl)
            .field("entries", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl MetricCache {
    /// Return the cached value for `key`, loading it if missing or expired.
    ///
    /// Concurrent callers for the same key share a single load and observe
    /// the same value or the same error.
    pub async fn get(&self, key: &str) -> Result<f64, CacheError> {
        let (load, evicted) = {
            let mut state = self.inner.lock();
            let now = Instant::now();

            let fresh = state
                .entries
                .get(key)
                .filter(|entry| !entry.is_expired_at(now))
                .map(|entry| entry.value);
            if let Some(value) = fresh {
                return Ok(value);
            }

            let evicted = state.entries.remove(key).is_some();
            (self.join_or_start(&mut state, key), evicted)
        };

        if evicted {
            self.inner.notify(key, EvictionReason::Expired);
        }
        load.await
    }

    /// Force a load of `key` regardless of freshness.
    ///
    /// Joins a load already in flight instead of starting another. On
    /// failure the previously cached value, if any, is left in place.
    pub async fn refresh(&self, key: &str) -> Result<f64, CacheError> {
        let load = {
            let mut state = self.inner.lock();
            self.join_or_start(&mut state, key)
        };
        load.await
    }

    /// Snapshot of the entry for `key` without loading or touching it.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Remove entries whose expiry passed more than `grace` ago.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let removed: Vec<String> = {
            let mut state = self.inner.lock();
            let stale: Vec<String> = state
                .entries
                .values()
                .filter(|entry| {
                    entry
                        .expires_at
                        .checked_add(grace)
                        .is_some_and(|cutoff| now >= cutoff)
                })
                .map(|entry| entry.key.clone())
                .collect();
            for key in &stale {
                state.entries.remove(key);
            }
            stale
        };

        for key in &removed {
            self.inner.notify(key, EvictionReason::Swept);
        }
        removed.len()
    }

    /// Number of cached entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time-to-live applied to loaded values.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    fn join_or_start(&self, state: &mut State, key: &str) -> SharedLoad {
        if let Some(load) = state.in_flight.get(key) {
            return load.clone();
        }

        let inner = Arc::clone(&self.inner);
        let owned = key.to_owned();
        let handle = tokio::spawn(inner.run_load(owned.clone()));

        let load = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(key = %owned, error = %e, "Cache load task failed");
                    Err(CacheError::Aborted(owned))
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(key.to_owned(), load.clone());
        load
    }
}
