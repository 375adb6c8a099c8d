//! HTTP gauge provider.
//!
//! Pulls a single number from an HTTP endpoint, either as the whole
//! plain-text body or through a JSON pointer into a JSON body.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::cache::MetricCache;
use crate::config::expand_env_vars;
use crate::provider::{Emitter, MetricProvider, ProviderError, ScrapeContext};

/// Default upstream request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cache key prefix for HTTP providers.
const KEY_PREFIX: &str = "http.";

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Configuration for an HTTP gauge provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Unique provider name, also the metric name suffix.
    pub name: String,
    /// Upstream URL.
    pub url: String,
    /// Help text for the exported gauge.
    #[serde(default)]
    pub help: Option<String>,
    /// Enable this provider (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// JSON pointer (RFC 6901) to the value, e.g. `/data/count`.
    /// When unset the body is parsed as a plain number.
    #[serde(default)]
    pub json_pointer: Option<String>,
    /// Upstream request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Request headers with environment variable substitution support.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Static labels attached to the exported series.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl HttpProviderConfig {
    /// Create a new HTTP provider configuration.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            help: None,
            enabled: true,
            json_pointer: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Set the JSON pointer used to extract the value.
    pub fn with_json_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.json_pointer = Some(pointer.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add a static label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Gauge whose value comes from an HTTP endpoint.
pub struct HttpGaugeProvider {
    config: HttpProviderConfig,
    client: Client,
    metric_name: String,
    help: String,
    cache_key: String,
}

impl HttpGaugeProvider {
    /// Create a provider exporting `<namespace>_<name>`.
    pub fn new(config: HttpProviderConfig, namespace: &str) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let metric_name = if namespace.is_empty() {
            config.name.clone()
        } else {
            format!("{}_{}", namespace, config.name)
        };
        let help = config
            .help
            .clone()
            .unwrap_or_else(|| format!("Value pulled from {}", config.url));
        let cache_key = format!("{}{}", KEY_PREFIX, config.name);

        Ok(Self {
            config,
            client,
            metric_name,
            help,
            cache_key,
        })
    }

    /// Name of the exported gauge.
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }
}

impl std::fmt::Debug for HttpGaugeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGaugeProvider")
            .field("config", &self.config)
            .field("cache_key", &self.cache_key)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl MetricProvider for HttpGaugeProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn cache_keys(&self) -> Vec<String> {
        vec![self.cache_key.clone()]
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        cache: &MetricCache,
        emitter: &mut Emitter,
    ) -> Result<(), ProviderError> {
        let value = cache.get(&self.cache_key).await?;
        let labels: Vec<(&str, &str)> = self
            .config
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        emitter.gauge(&self.metric_name, &self.help, &labels, value);
        Ok(())
    }

    async fn pull_external(&self, key: &str) -> Result<f64, ProviderError> {
        if key != self.cache_key {
            return Err(ProviderError::Internal(format!(
                "provider '{}' does not own key '{}'",
                self.config.name, key
            )));
        }

        let mut request = self.client.get(&self.config.url);
        for (name, value) in &self.config.headers {
            request = request.header(name, expand_env_vars(value));
        }

        let body = request.send().await?.error_for_status()?.text().await?;
        parse_value(&body, self.config.json_pointer.as_deref())
    }
}

/// Extract a number from a response body.
fn parse_value(body: &str, pointer: Option<&str>) -> Result<f64, ProviderError> {
    let Some(pointer) = pointer else {
        return body
            .trim()
            .parse::<f64>()
            .map_err(|e| ProviderError::Upstream(format!("body is not a number: {e}")));
    };

    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::Upstream(format!("body is not JSON: {e}")))?;
    let found = json
        .pointer(pointer)
        .ok_or_else(|| ProviderError::Upstream(format!("no value at '{pointer}'")))?;

    match found {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ProviderError::Upstream(format!("value at '{pointer}' out of range"))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| ProviderError::Upstream(format!("value at '{pointer}': {e}"))),
        serde_json::Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(ProviderError::Upstream(format!(
            "value at '{pointer}' is not numeric: {other}"
        ))),
    }
}
