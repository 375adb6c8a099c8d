//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_SWEEP_GRACE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::collector::ScrapeSettings;
use crate::refresh::{DEFAULT_REFRESH_INTERVAL, MIN_INTERVAL};

use super::provider::ProvidersConfig;
use super::validation::{ConfigError, is_valid_metric_name};

// =============================================================================
// Constants
// =============================================================================

/// Default exporter port.
pub const DEFAULT_PORT: u16 = 9184;

/// Default metric namespace for exporter self-metrics and provider gauges.
pub const DEFAULT_NAMESPACE: &str = "promcache";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9184).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Value cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a loaded value (default: 30m).
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How often the sweeper looks for long-expired entries (default: 1m).
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// How long past expiry an entry survives before the sweeper drops it
    /// (default: 1m).
    #[serde(with = "humantime_serde")]
    pub sweep_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_grace: DEFAULT_SWEEP_GRACE,
        }
    }
}

// =============================================================================
// Refresh Configuration
// =============================================================================

/// Background refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Run the refresh scheduler (default: true).
    pub enabled: bool,

    /// Refresh period for every provider key (default: 30s, minimum: 1s).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Prefix for provider gauges and exporter self-metrics.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Value cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background refresh configuration.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Scrape deadline settings.
    #[serde(default)]
    pub scrape: ScrapeSettings,

    /// Provider configurations grouped by type.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Path to a directory with additional provider config files.
    #[serde(default)]
    pub provider_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            namespace: default_namespace(),
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            scrape: ScrapeSettings::default(),
            providers: ProvidersConfig::default(),
            provider_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration including the provider_path directory.
    ///
    /// If `provider_path` is specified, scans the directory for YAML files
    /// and merges their provider configurations.
    pub fn load_with_provider_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;

        if let Some(ref provider_dir) = config.provider_path {
            let additional = ProvidersConfig::load_from_dir(provider_dir)?;
            config.providers = config.providers.merge(additional);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if !self.namespace.is_empty() && !is_valid_metric_name(&self.namespace) {
            return Err(ConfigError::ValidationError(format!(
                "invalid namespace: '{}'",
                self.namespace
            )));
        }

        if self.cache.ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "cache ttl must be positive".to_string(),
            ));
        }

        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "cache sweep_interval must be positive".to_string(),
            ));
        }

        if self.refresh.enabled {
            if self.refresh.interval < MIN_INTERVAL {
                return Err(ConfigError::ValidationError(format!(
                    "refresh interval must be at least {}",
                    humantime::format_duration(MIN_INTERVAL)
                )));
            }
            // A longer interval lets entries expire between refreshes.
            if self.refresh.interval > self.cache.ttl {
                return Err(ConfigError::ValidationError(format!(
                    "refresh interval ({}) must not exceed cache ttl ({})",
                    humantime::format_duration(self.refresh.interval),
                    humantime::format_duration(self.cache.ttl)
                )));
            }
        }

        if self.scrape.default_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "scrape default_timeout must be positive".to_string(),
            ));
        }

        if self.scrape.timeout_offset >= self.scrape.default_timeout {
            return Err(ConfigError::ValidationError(
                "scrape timeout_offset must be lower than default_timeout".to_string(),
            ));
        }

        self.providers.validate()?;

        Ok(())
    }
}
