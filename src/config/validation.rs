//! Configuration validation utilities.

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Whether `name` is a valid Prometheus metric name.
pub fn is_valid_metric_name(name: &str) -> bool {
    static METRIC_NAME_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = METRIC_NAME_REGEX.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("failed to compile metric name regex")
    });
    regex.is_match(name)
}

/// Whether `name` is a valid Prometheus label name.
///
/// Names starting with `__` are reserved for internal use.
pub fn is_valid_label_name(name: &str) -> bool {
    static LABEL_NAME_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = LABEL_NAME_REGEX.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("failed to compile label name regex")
    });
    regex.is_match(name) && !name.starts_with("__")
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}
