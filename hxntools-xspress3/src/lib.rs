//! hxntools-xspress3: Xspress3 ROI configuration and archive extraction.
//!
//! This crate manages the per-channel regions of interest of a Quantum
//! Detectors Xspress3 MCA detector and recovers ROI series from archived
//! captures after a fly scan.
//!
//! # Key Components
//!
//! - [`RoiRegistry`] - `(channel, slot)` map of ROI definitions, programming
//!   hardware slots up to the IOC's capacity
//! - [`HardwareRoi`] - live handle on one hardware ROI slot
//! - [`extract_rois`] - retrying archive open plus lazy per-ROI extraction
//! - [`Xspress3Detector`] - detector handle, acquisition control and trigger
//!   modes
//! - [`Xspress3FileStore`] - resource and datum registration for captures
//!
//! Energies are in eV and map to 10 eV MCA bins.

mod config;
pub mod detector;
mod error;
pub mod extract;
pub mod filestore;
mod hardware;
mod roi;
mod rois;

pub use config::{RetryConfig, Xspress3Config};
pub use detector::{DetectorAddresses, Xspress3Detector, TRIGGER_INTERNAL, TRIGGER_TTL_VETO};
pub use error::{Error, Result};
pub use extract::{
    extract_rois, open_archive, AcquisitionControl, ExtractOptions, OfflineControl, RoiExtraction,
};
pub use filestore::{FieldDescriptor, Reading, Xspress3FileStore};
pub use hardware::{HardwareRoi, RoiAddresses};
pub use roi::{RoiBounds, RoiDefinition, RoiInfo, RoiSnapshot};
pub use rois::RoiRegistry;

// Re-export core types for convenience
pub use hxntools_core::{bin_to_ev, ev_to_bin, ArchiveOpener, SpectrumArchive};
