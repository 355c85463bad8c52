//! hxntools-core: Core traits and types for HXN beamline detector glue.
//!
//! This crate provides the device-signal abstraction, the beam-availability
//! gate, scan bookkeeping, the data-registry interface, and the archived
//! spectra interfaces shared by the detector adapters.
//!

pub mod archive;
pub mod beam;
pub mod energy;
pub mod error;
pub mod registry;
pub mod scan;
pub mod signal;

pub use archive::{
    ArchiveOpener, SpectraShape, SpectrumArchive, SpectrumCube, XRF_DATA_KEY, XSPRESS3_HANDLER,
};
pub use beam::{BeamGate, BeamGateConfig, BeamReading, BeamState, BeamTransition, WaitToken};
pub use energy::{bin_to_ev, ev_to_bin, BIN_WIDTH_EV};
pub use error::{Error, ExtractionError, Result};
pub use registry::{DataRegistry, MemoryRegistry, ResourceId};
pub use scan::{scan_setup, ModalDetector, ModeSettings, ScanIdService, ScanType, TriggerMode};
pub use signal::{MemorySignals, SignalIo, Value};
