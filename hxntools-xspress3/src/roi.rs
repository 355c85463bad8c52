//! ROI definitions and snapshots.

use crate::hardware::HardwareRoi;
use crate::{Error, Result};
use hxntools_core::energy::{bin_to_ev, ev_to_bin};

/// Energy and bin bounds of an ROI.
///
/// Built from either pair; the other is derived through the 10 eV bin
/// transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoiBounds {
    pub ev_low: i64,
    pub ev_high: i64,
    pub bin_low: i64,
    pub bin_high: i64,
}

impl RoiBounds {
    /// Bounds from an energy window in eV.
    #[must_use]
    pub fn from_energy(ev_low: i64, ev_high: i64) -> Self {
        Self {
            ev_low,
            ev_high,
            bin_low: ev_to_bin(ev_low),
            bin_high: ev_to_bin(ev_high),
        }
    }

    /// Bounds from a bin window.
    #[must_use]
    pub fn from_bins(bin_low: i64, bin_high: i64) -> Self {
        Self {
            ev_low: bin_to_ev(bin_low),
            ev_high: bin_to_ev(bin_high),
            bin_low,
            bin_high,
        }
    }

    /// Bounds from whichever pair is supplied. Energy wins if both are.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if neither pair is supplied.
    pub fn new(energy: Option<(i64, i64)>, bins: Option<(i64, i64)>) -> Result<Self> {
        match (energy, bins) {
            (Some((low, high)), _) => Ok(Self::from_energy(low, high)),
            (None, Some((low, high))) => Ok(Self::from_bins(low, high)),
            (None, None) => Err(Error::ConfigError(
                "bin or energy bounds must be specified".into(),
            )),
        }
    }
}

/// Identity of an ROI: where it lives and what it integrates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoiInfo {
    pub channel: u32,
    pub slot: u32,
    pub name: Option<String>,
    pub bounds: RoiBounds,
}

impl RoiInfo {
    /// Name used in logs and sort order; empty when unnamed.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// A stored ROI, optionally backed by a live hardware slot.
#[derive(Debug)]
pub struct RoiDefinition {
    info: RoiInfo,
    hardware: Option<HardwareRoi>,
}

impl RoiDefinition {
    pub(crate) fn new(info: RoiInfo, hardware: Option<HardwareRoi>) -> Self {
        Self { info, hardware }
    }

    #[must_use]
    pub fn info(&self) -> &RoiInfo {
        &self.info
    }

    #[must_use]
    pub fn channel(&self) -> u32 {
        self.info.channel
    }

    #[must_use]
    pub fn slot(&self) -> u32 {
        self.info.slot
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    #[must_use]
    pub fn bounds(&self) -> RoiBounds {
        self.info.bounds
    }

    /// Live hardware binding, present only for slots within capacity.
    #[must_use]
    pub fn hardware(&self) -> Option<&HardwareRoi> {
        self.hardware.as_ref()
    }

    pub(crate) fn into_hardware(self) -> Option<HardwareRoi> {
        self.hardware
    }
}

/// An ROI with its extracted per-point series.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiSnapshot {
    pub info: RoiInfo,
    pub data: Vec<f64>,
}

impl RoiSnapshot {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    #[must_use]
    pub fn channel(&self) -> u32 {
        self.info.channel
    }

    /// Sum over all points.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.data.iter().sum()
    }
}
