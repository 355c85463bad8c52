//! hxntools-merlin: Merlin area-detector support.
//!
//! Trigger-mode handling and HDF5 file-plugin staging for a Quantum Detectors
//! Merlin photon-counting camera.
//!
//! # Key Components
//!
//! - [`MerlinDetector`] - trigger modes through [`ModalDetector`], staging,
//!   resource and datum registration
//! - [`StageSigs`] - ordered staging writes with restore on unstage
//! - [`MerlinConfig`] - IOC prefix, capture paths and exposure
//!
//! [`ModalDetector`]: hxntools_core::ModalDetector

mod config;
pub mod detector;
mod error;
pub mod stage;

pub use config::MerlinConfig;
pub use detector::{
    MerlinAddresses, MerlinDetector, EXTERNAL_ACQUIRE_PERIOD, EXTERNAL_ACQUIRE_TIME,
    INTERNAL_READOUT_GAP, MERLIN_HANDLER,
};
pub use error::{Error, Result};
pub use stage::{StageSigs, Staged};
