//! Scan bookkeeping: scan-ID allocation and detector trigger-mode setup.

use crate::signal::{SignalIo, Value};
use crate::{Error, Result};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Default prefix of the beamline scan-ID IOC.
pub const DEFAULT_SCAN_ID_PREFIX: &str = "XF:03IDC-ES{Status}";

/// Allocates scan IDs from the beamline IOC.
///
/// Owned by whichever orchestration code needs it; there is no process-wide
/// instance.
pub struct ScanIdService {
    signals: Arc<dyn SignalIo>,
    next_cmd: String,
    scan_id: String,
}

impl ScanIdService {
    /// Creates a service bound to the IOC at `prefix`.
    pub fn new(signals: Arc<dyn SignalIo>, prefix: &str) -> Self {
        Self {
            signals,
            next_cmd: format!("{prefix}NextScanID-Cmd.PROC"),
            scan_id: format!("{prefix}ScanID-I"),
        }
    }

    /// Creates a service bound to the beamline's scan-ID IOC.
    pub fn with_default_prefix(signals: Arc<dyn SignalIo>) -> Self {
        Self::new(signals, DEFAULT_SCAN_ID_PREFIX)
    }

    /// Address of the scan-ID readback.
    #[must_use]
    pub fn scan_id_address(&self) -> &str {
        &self.scan_id
    }

    /// Current scan ID without advancing it.
    pub fn current(&self) -> Result<u64> {
        let raw = self.signals.get_int(&self.scan_id)?;
        u64::try_from(raw).map_err(|_| Error::Device {
            address: self.scan_id.clone(),
            message: format!("negative scan ID {raw}"),
        })
    }

    /// Advances the IOC counter and returns the new scan ID.
    ///
    /// # Errors
    /// Returns [`Error::ScanIdUnchanged`] if the IOC did not advance.
    pub fn next_scan_id(&self) -> Result<u64> {
        let last = self.current()?;
        self.signals.put(&self.next_cmd, Value::Int(1), true)?;
        let new = self.current()?;
        if new == last {
            return Err(Error::ScanIdUnchanged(new));
        }
        Ok(new)
    }

    /// Scan ID to seed the run engine with; it increments once on run open.
    pub fn run_start_id(&self) -> Result<u64> {
        Ok(self.next_scan_id()?.saturating_sub(1))
    }
}

/// Detector triggering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Internal,
    External,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Internal => write!(f, "internal"),
            TriggerMode::External => write!(f, "external"),
        }
    }
}

/// Kind of scan a detector is being prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Step,
    Fly,
}

/// Per-scan mode settings pushed to a detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSettings {
    pub mode: TriggerMode,
    pub scan_type: ScanType,
    pub total_points: usize,
}

/// A detector that can switch between internal and external triggering.
pub trait ModalDetector {
    /// Detector name, for logging.
    fn name(&self) -> &str;

    /// Applies the settings and performs any mode-specific setup.
    fn apply_mode(&mut self, settings: &ModeSettings) -> Result<()>;
}

/// Prepares detectors for a step scan of `total_points`.
///
/// Every detector first gets internal triggering so mode-specific setup runs
/// from a known state, then all are switched to external triggering.
pub fn scan_setup(detectors: &mut [&mut dyn ModalDetector], total_points: usize) -> Result<()> {
    let mut settings = ModeSettings {
        mode: TriggerMode::Internal,
        scan_type: ScanType::Step,
        total_points,
    };

    for det in detectors.iter_mut() {
        debug!("Setting up detector {}", det.name());
        det.apply_mode(&settings)?;
    }

    settings.mode = TriggerMode::External;
    for det in detectors.iter_mut() {
        det.apply_mode(&settings)?;
    }
    Ok(())
}

/// Points in an inner-product (or 1-D) scan.
#[must_use]
pub fn inner_product_points(num: usize) -> usize {
    num
}

/// Points in an outer-product (grid) scan: the product of per-axis counts.
#[must_use]
pub fn outer_product_points(axis_points: &[usize]) -> usize {
    axis_points.iter().product()
}
