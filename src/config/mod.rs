//! Configuration module for the exporter.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Cache settings (TTL, sweep cadence)
//! - Refresh scheduler and scrape deadline settings
//! - Provider definitions and an optional provider include directory

mod app;
mod provider;
mod validation;

pub use app::{AppConfig, CacheConfig, DEFAULT_NAMESPACE, DEFAULT_PORT, RefreshConfig, ServerConfig};
pub use provider::ProvidersConfig;
pub use validation::{ConfigError, expand_env_vars, is_valid_label_name, is_valid_metric_name};
