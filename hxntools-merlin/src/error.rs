//! Merlin-specific error types.

use thiserror::Error;

/// Result type for Merlin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Merlin-specific error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or exposure setting.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Staging was requested before any trigger mode was applied.
    #[error("detector {0} has no trigger mode; run scan setup first")]
    NoMode(String),

    /// A capture operation needs the detector to be staged.
    #[error("detector {0} is not staged")]
    NotStaged(String),

    /// The detector is already staged.
    #[error("detector {0} is already staged")]
    AlreadyStaged(String),

    /// Directory creation or configuration file I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file parse error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Core library error (device access, data registry).
    #[error("core error: {0}")]
    CoreError(#[from] hxntools_core::Error),
}
