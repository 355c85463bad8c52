//! I/O error types.

use hxntools_core::ExtractionError;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Spectrum lookup error.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] hxntools_core::Error),
}
