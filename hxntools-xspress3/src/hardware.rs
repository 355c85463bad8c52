//! Live hardware ROI handles.
//!
//! Each Xspress3 channel exposes a fixed number of ROI slots evaluated by the
//! IOC. A [`HardwareRoi`] binds one `(channel, slot)` pair to its control
//! points; addresses are computed once at construction.

use hxntools_core::energy::bin_to_ev;
use hxntools_core::{SignalIo, Value};
use std::fmt;
use std::sync::Arc;

use crate::Result;

/// Control-point addresses of one hardware ROI slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoiAddresses {
    pub bin_low: String,
    pub bin_high: String,
    pub enable: String,
    pub value: String,
    pub value_sum: String,
    pub array: String,
}

impl RoiAddresses {
    /// Expands the address template for `(channel, slot)` under `prefix`.
    #[must_use]
    pub fn new(prefix: &str, channel: u32, slot: u32) -> Self {
        let roi = format!("{prefix}C{channel}_ROI{slot}");
        let mca = format!("{prefix}C{channel}_MCA_ROI{slot}");
        Self {
            bin_low: format!("{mca}_LLM"),
            bin_high: format!("{mca}_HLM"),
            enable: format!("{roi}:EnableCallbacks"),
            value: format!("{roi}:Value_RBV"),
            value_sum: format!("{roi}:ValueSum_RBV"),
            array: format!("{roi}:ArrayData"),
        }
    }
}

/// A configurable hardware ROI.
///
/// Owned exclusively by the ROI definition it was created for; not `Clone`.
pub struct HardwareRoi {
    channel: u32,
    slot: u32,
    addresses: RoiAddresses,
    signals: Arc<dyn SignalIo>,
}

impl fmt::Debug for HardwareRoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareRoi")
            .field("channel", &self.channel)
            .field("slot", &self.slot)
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

impl HardwareRoi {
    /// Binds slot `slot` of `channel` on the detector at `prefix`.
    pub fn new(signals: Arc<dyn SignalIo>, prefix: &str, channel: u32, slot: u32) -> Self {
        Self {
            channel,
            slot,
            addresses: RoiAddresses::new(prefix, channel, slot),
            signals,
        }
    }

    #[must_use]
    pub fn channel(&self) -> u32 {
        self.channel
    }

    #[must_use]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    #[must_use]
    pub fn addresses(&self) -> &RoiAddresses {
        &self.addresses
    }

    /// Lower bin bound currently programmed.
    pub fn bin_low(&self) -> Result<i64> {
        Ok(self.signals.get_int(&self.addresses.bin_low)?)
    }

    /// Upper bin bound currently programmed.
    pub fn bin_high(&self) -> Result<i64> {
        Ok(self.signals.get_int(&self.addresses.bin_high)?)
    }

    /// Lower energy bound (eV) derived from the programmed bins.
    pub fn ev_low(&self) -> Result<i64> {
        Ok(bin_to_ev(self.bin_low()?))
    }

    /// Upper energy bound (eV) derived from the programmed bins.
    pub fn ev_high(&self) -> Result<i64> {
        Ok(bin_to_ev(self.bin_high()?))
    }

    /// Whether the IOC is evaluating this ROI.
    pub fn is_enabled(&self) -> Result<bool> {
        Ok(self.signals.get_int(&self.addresses.enable)? != 0)
    }

    /// Most recent per-frame ROI value.
    pub fn value(&self) -> Result<f64> {
        Ok(self.signals.get_float(&self.addresses.value)?)
    }

    /// Running ROI sum since the last erase.
    pub fn value_sum(&self) -> Result<f64> {
        Ok(self.signals.get_float(&self.addresses.value_sum)?)
    }

    fn put_bin_low(&self, bin: i64) -> Result<()> {
        Ok(self.signals.put(&self.addresses.bin_low, Value::Int(bin), false)?)
    }

    fn put_bin_high(&self, bin: i64) -> Result<()> {
        Ok(self.signals.put(&self.addresses.bin_high, Value::Int(bin), false)?)
    }

    fn put_enabled(&self, enabled: bool) -> Result<()> {
        Ok(self.signals.put(&self.addresses.enable, enabled.into(), false)?)
    }

    /// Programs the bin window `[low, high)`.
    ///
    /// The device must never see `low > high`, so when the new upper bound
    /// is at or below the current lower bound the lower bound is zeroed
    /// first. The ROI is enabled only for a non-empty window.
    pub fn configure_bin(&self, low: i64, high: i64) -> Result<()> {
        if high <= self.bin_low()? {
            self.put_bin_low(0)?;
        }

        self.put_bin_high(high)?;
        self.put_bin_low(low)?;
        self.put_enabled(high > low)
    }

    /// Zeroes both bounds and disables the ROI. No-op if already zeroed.
    pub fn clear(&self) -> Result<()> {
        if self.bin_low()? == 0 && self.bin_high()? == 0 {
            return Ok(());
        }

        self.put_bin_low(0)?;
        self.put_bin_high(0)?;
        self.put_enabled(false)
    }
}
