//! Error types for hxntools-core.

use thiserror::Error;

/// Result type alias for hxntools operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for hxntools operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A device signal could not be read or written.
    #[error("device error at {address}: {message}")]
    Device { address: String, message: String },

    /// A signal held a value of the wrong kind.
    #[error("signal {address} holds {found}, expected {expected}")]
    SignalType {
        address: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The scan-ID IOC did not advance the scan counter.
    #[error("scan ID unchanged at {0}; check the scan-ID IOC")]
    ScanIdUnchanged(u64),

    /// Data-registry insertion failed.
    #[error("data registry error: {0}")]
    Registry(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Spectrum extraction error.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Errors raised while computing ROI series from an archived capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The requested dataset does not exist in the archive.
    #[error("dataset not found: {0}")]
    MissingDataset(String),

    /// The spectra dataset does not have the `(points, channels, bins)` layout.
    #[error("dataset {key} must be 3-D (points, channels, bins), got shape {shape:?}")]
    InvalidShape { key: String, shape: Vec<usize> },

    /// Channel number outside the archived channel range.
    #[error("channel {channel} out of range (archive has {channels} channels)")]
    ChannelOutOfRange { channel: u32, channels: usize },

    /// Frame number outside the archived point range.
    #[error("frame {frame} out of range (archive has {points} points)")]
    FrameOutOfRange { frame: usize, points: usize },

    /// Bin bounds are inverted, negative, or past the spectrum length.
    #[error("invalid bin range [{low}, {high}) for spectra of {bins} bins")]
    InvalidBins { low: i64, high: i64, bins: usize },

    /// Backend read failure.
    #[error("read error: {0}")]
    Read(String),
}
