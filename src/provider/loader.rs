//! Cache loader backed by providers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{BoxError, CacheError, CacheLoader};
use crate::provider::{MetricProvider, ProviderError};

/// Dispatches each cache load to the provider that owns the key.
pub struct ProviderLoader {
    owners: HashMap<String, Arc<dyn MetricProvider>>,
}

impl ProviderLoader {
    /// Index the cache keys of every provider.
    ///
    /// # Errors
    /// Returns `ProviderError::DuplicateKey` if two providers list the same key.
    pub fn new(providers: &[Arc<dyn MetricProvider>]) -> Result<Self, ProviderError> {
        let mut owners: HashMap<String, Arc<dyn MetricProvider>> = HashMap::new();

        for provider in providers {
            for key in provider.cache_keys() {
                if let Some(existing) = owners.get(&key) {
                    return Err(ProviderError::DuplicateKey {
                        key,
                        first: existing.name().to_string(),
                        second: provider.name().to_string(),
                    });
                }
                owners.insert(key, Arc::clone(provider));
            }
        }

        Ok(Self { owners })
    }

    /// All keys known to the loader, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.owners.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for ProviderLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLoader")
            .field("keys", &self.keys())
            .finish()
    }
}

#[async_trait::async_trait]
impl CacheLoader for ProviderLoader {
    async fn load(&self, key: &str) -> Result<f64, BoxError> {
        let Some(provider) = self.owners.get(key) else {
            return Err(Box::new(CacheError::UnknownKey(key.to_string())));
        };

        tracing::debug!(provider = %provider.name(), key = %key, "Pulling value from upstream");
        provider.pull_external(key).await.map_err(Into::into)
    }
}
