//! hxntools-io: HDF5 access to archived Xspress3 captures.
//!
//! This crate reads and writes the `(points, channels, bins)` spectra files
//! produced by the Xspress3 HDF5 plugin, via hdf5-metno.
//!

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;

pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use self::hdf5::{write_spectra_hdf5, Hdf5ArchiveOpener, SpectraWriteOptions, Xspress3Hdf5Handler};
