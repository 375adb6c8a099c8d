//! Cache-specific error types.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by [`CacheLoader`](super::CacheLoader) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by cache reads.
///
/// Cloneable so that every waiter of a shared load observes the same failure.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The loader failed to produce a value.
    #[error("failed to load '{key}': {message}")]
    Load {
        /// Key being loaded.
        key: String,
        /// Rendered loader error.
        message: Arc<str>,
    },

    /// No loader knows how to produce this key.
    #[error("no loader registered for key '{0}'")]
    UnknownKey(String),

    /// The load task was cancelled or panicked before producing a value.
    #[error("load task for '{0}' aborted")]
    Aborted(String),
}

impl CacheError {
    /// Key the error refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::Load { key, .. } => key,
            Self::UnknownKey(key) | Self::Aborted(key) => key,
        }
    }
}
