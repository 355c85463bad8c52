//! Xspress3-specific error types.

use hxntools_core::ExtractionError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for Xspress3 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Xspress3-specific error types.
#[derive(Error, Debug)]
pub enum Error {
    /// ROI slot beyond what the IOC can evaluate while `limit_rois` is set.
    #[error(
        "cannot configure ROI {slot} on channel {channel}: the IOC supports {capacity} \
         (limit_rois is enabled)"
    )]
    CapacityExceeded {
        channel: u32,
        slot: u32,
        capacity: u32,
    },

    /// The archive could not be opened, with retries exhausted or disabled.
    #[error("unable to open archive {path}: {reason}")]
    ArchiveUnavailable { path: PathBuf, reason: String },

    /// Waiting for the archive was cancelled.
    #[error("unable to open archive {path}: interrupted")]
    Interrupted { path: PathBuf },

    /// The archive opened but a requested ROI could not be read.
    #[error("extraction error for ROI {roi}: {source}")]
    Extraction {
        roi: String,
        #[source]
        source: ExtractionError,
    },

    /// Invalid channel, slot, bounds, or configuration file.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Configuration file I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file parse error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Core library error (device access, data registry).
    #[error("core error: {0}")]
    CoreError(#[from] hxntools_core::Error),
}
