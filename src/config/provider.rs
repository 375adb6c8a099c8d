//! Provider configuration structures.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::provider::http::{HttpGaugeProvider, HttpProviderConfig};
use crate::provider::{MetricProvider, ProviderError};

use super::validation::{ConfigError, is_valid_label_name, is_valid_metric_name};

/// Provider configurations grouped by type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// HTTP gauge providers.
    #[serde(default)]
    pub http: Vec<HttpProviderConfig>,
}

impl ProvidersConfig {
    /// Merge another ProvidersConfig into this one.
    #[must_use]
    pub fn merge(mut self, other: ProvidersConfig) -> Self {
        self.http.extend(other.http);
        self
    }

    /// Enabled HTTP providers.
    pub fn enabled_http(&self) -> impl Iterator<Item = &HttpProviderConfig> {
        self.http.iter().filter(|p| p.enabled)
    }

    /// Instantiate every enabled provider.
    ///
    /// # Errors
    /// Returns `ProviderError` if a provider cannot be constructed.
    pub fn build_providers(
        &self,
        namespace: &str,
    ) -> Result<Vec<Arc<dyn MetricProvider>>, ProviderError> {
        let mut providers: Vec<Arc<dyn MetricProvider>> = Vec::new();
        for config in self.enabled_http() {
            let provider = HttpGaugeProvider::new(config.clone(), namespace)?;
            tracing::debug!(provider = %config.name, metric = %provider.metric_name(), "Built HTTP provider");
            providers.push(Arc::new(provider));
        }
        Ok(providers)
    }

    /// Validate all provider configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();

        for http in &self.http {
            if http.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "http provider name cannot be empty".to_string(),
                ));
            }
            if !seen_names.insert(&http.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider name: '{}'",
                    http.name
                )));
            }
            if !is_valid_metric_name(&http.name) {
                return Err(ConfigError::ValidationError(format!(
                    "http provider '{}': name must be a valid metric name",
                    http.name
                )));
            }
            reqwest::Url::parse(&http.url).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "http provider '{}': invalid URL '{}': {}",
                    http.name, http.url, e
                ))
            })?;
            if let Some(pointer) = &http.json_pointer
                && !pointer.is_empty()
                && !pointer.starts_with('/')
            {
                return Err(ConfigError::ValidationError(format!(
                    "http provider '{}': json_pointer must start with '/'",
                    http.name
                )));
            }
            if let Some(label) = http.labels.keys().find(|k| !is_valid_label_name(k)) {
                return Err(ConfigError::ValidationError(format!(
                    "http provider '{}': invalid label name '{}'",
                    http.name, label
                )));
            }
            if http.timeout.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "http provider '{}': timeout must be positive",
                    http.name
                )));
            }
        }

        Ok(())
    }

    /// Load provider configurations from all YAML files in a directory.
    pub fn load_from_dir(dir_path: &str) -> Result<Self, ConfigError> {
        let dir = Path::new(dir_path);
        if !dir.exists() {
            return Err(ConfigError::ValidationError(format!(
                "provider_path '{}' does not exist",
                dir_path
            )));
        }
        if !dir.is_dir() {
            return Err(ConfigError::ValidationError(format!(
                "provider_path '{}' is not a directory",
                dir_path
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext == "yaml" || ext == "yml" {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = Self::default();
        for path in paths {
            tracing::debug!("Loading provider config from: {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let file_config: Self = serde_yaml::from_str(&content).map_err(|e| {
                ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
            })?;

            merged = merged.merge(file_config);
        }

        Ok(merged)
    }
}
