//! Error types for the migration subsystem.

use archivist_core::CatalogError;
use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for scheduler, pool and poller operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Configuration errors. Any of these blocks start-up or a reload.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its allowed range.
    #[error("invalid value for '{key}': {reason}")]
    Validation {
        /// Parameter name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A literal could not be parsed.
    #[error("malformed {kind} literal for '{key}': '{literal}'")]
    Malformed {
        /// Parameter name.
        key: String,
        /// Expected literal kind (duration, size, integer, boolean).
        kind: &'static str,
        /// The offending text.
        literal: String,
    },

    /// The configuration document is not valid TOML.
    #[error("config parse error: {0}")]
    Parse(String),

    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn validation(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Validation {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the scheduler, the worker pool and the poller.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Catalog access failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The external candidate selection failed.
    #[error("candidate selection failed: {0}")]
    Selection(String),

    /// The worker pool no longer accepts requests.
    #[error("worker pool is shut down")]
    PoolClosed,
}
