//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache
///
/// Loader failures are deliberately absent: `get_or_load` hands the loader's
/// own error back to the caller untouched.
#[derive(Error, Debug)]
pub enum Error {
    /// A single value is larger than every tier it could be placed in
    #[error("Value for key '{key}' needs {size} bytes, largest tier holds {capacity}")]
    Capacity {
        key: String,
        size: u64,
        capacity: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Write attempted after the cache was destroyed
    #[error("Cache has been destroyed")]
    Destroyed,

    /// Named tier does not exist
    #[error("Unknown cache tier: {0}")]
    UnknownTier(String),

    /// Key pattern failed to compile
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Prefetch failed (logged and counted, never returned from a read)
    #[error("Prefetch of '{key}' failed: {reason}")]
    Prefetch { key: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a prefetch failure from any displayable reason
    pub fn prefetch(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Prefetch {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures the cache absorbs instead of surfacing
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Error::Prefetch { .. })
    }
}
