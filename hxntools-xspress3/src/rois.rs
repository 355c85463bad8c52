//! ROI registry.
//!
//! Maps `(channel, slot)` to ROI definitions. Slots up to the IOC's ROI
//! capacity are programmed into hardware; with `limit_rois` disabled, slots
//! beyond it are kept as offline-only definitions usable for archive
//! extraction but invisible to live preview.

use crate::config::Xspress3Config;
use crate::extract::{extract_rois, AcquisitionControl, ExtractOptions, RoiExtraction};
use crate::hardware::HardwareRoi;
use crate::roi::{RoiBounds, RoiDefinition, RoiInfo};
use crate::{Error, Result};
use hxntools_core::energy::whole_ev;
use hxntools_core::{ArchiveOpener, SignalIo};
use log::warn;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// ROI configuration for one detector.
pub struct RoiRegistry {
    signals: Arc<dyn SignalIo>,
    prefix: String,
    num_roi: u32,
    num_channels: u32,
    limit_rois: bool,
    channel_prefix: Option<String>,
    default_channels: Vec<u32>,
    rois: BTreeMap<u32, BTreeMap<u32, RoiDefinition>>,
}

impl std::fmt::Debug for RoiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoiRegistry")
            .field("prefix", &self.prefix)
            .field("num_roi", &self.num_roi)
            .field("limit_rois", &self.limit_rois)
            .field("rois", &self.rois)
            .finish_non_exhaustive()
    }
}

impl RoiRegistry {
    /// Creates an empty registry for the detector described by `config`.
    pub fn new(signals: Arc<dyn SignalIo>, config: &Xspress3Config) -> Self {
        Self {
            signals,
            prefix: config.prefix.clone(),
            num_roi: config.num_roi,
            num_channels: config.num_channels,
            limit_rois: config.limit_rois,
            channel_prefix: config.channel_prefix.clone(),
            default_channels: config.default_channels.clone(),
            rois: BTreeMap::new(),
        }
    }

    /// Hardware ROI slots per channel.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.num_roi
    }

    #[must_use]
    pub fn limit_rois(&self) -> bool {
        self.limit_rois
    }

    /// Changes the over-capacity policy for subsequent calls.
    pub fn set_limit_rois(&mut self, limit: bool) {
        self.limit_rois = limit;
    }

    /// Looks up the definition at `(channel, slot)`.
    #[must_use]
    pub fn get(&self, channel: u32, slot: u32) -> Option<&RoiDefinition> {
        self.rois.get(&channel)?.get(&slot)
    }

    /// Number of stored definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rois.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored definition. Restartable: each call walks the map afresh.
    pub fn all_rois(&self) -> impl Iterator<Item = &RoiDefinition> + '_ {
        self.rois.values().flat_map(BTreeMap::values)
    }

    /// Configures an ROI from an energy window in eV.
    ///
    /// Energies are truncated to whole eV. `0, 0` deletes the slot.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] for a NaN or infinite energy, and
    /// [`Error::CapacityExceeded`] for a slot beyond capacity while
    /// `limit_rois` is set. No state changes in either case.
    pub fn set(
        &mut self,
        channel: u32,
        slot: u32,
        ev_low: f64,
        ev_high: f64,
        name: Option<&str>,
    ) -> Result<()> {
        let (Some(ev_low), Some(ev_high)) = (whole_ev(ev_low), whole_ev(ev_high)) else {
            return Err(Error::ConfigError(format!(
                "ROI energies must be finite, got [{ev_low}, {ev_high}]"
            )));
        };

        if ev_low == 0 && ev_high == 0 {
            return self.remove(channel, slot);
        }
        self.insert(
            channel,
            slot,
            RoiBounds::from_energy(ev_low, ev_high),
            name,
        )
    }

    /// Configures an ROI from a bin window.
    ///
    /// `0, 0` deletes the slot.
    pub fn set_bins(
        &mut self,
        channel: u32,
        slot: u32,
        bin_low: i64,
        bin_high: i64,
        name: Option<&str>,
    ) -> Result<()> {
        if bin_low == 0 && bin_high == 0 {
            return self.remove(channel, slot);
        }
        self.insert(channel, slot, RoiBounds::from_bins(bin_low, bin_high), name)
    }

    /// Removes the ROI at `(channel, slot)`, clearing its hardware slot.
    /// Absent entries are ignored.
    pub fn clear(&mut self, channel: u32, slot: u32) -> Result<()> {
        self.set(channel, slot, 0.0, 0.0, None)
    }

    /// Clears every ROI on `channels`, or on all registered channels.
    ///
    /// Definitions are dropped even if a hardware write fails; every slot is
    /// still attempted and the first failure is returned.
    pub fn clear_all(&mut self, channels: Option<&[u32]>) -> Result<()> {
        let channels: Vec<u32> = match channels {
            Some(channels) => channels.to_vec(),
            None => self.rois.keys().copied().collect(),
        };

        let mut first_err = None;
        for channel in channels {
            let Some(chan_rois) = self.rois.remove(&channel) else {
                continue;
            };
            for hw in chan_rois.into_values().filter_map(RoiDefinition::into_hardware) {
                if let Err(e) = hw.clear() {
                    warn!("failed to clear ROI {} on channel {channel}: {e}", hw.slot());
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Adds an ROI in the lowest free slot of each channel (default: the
    /// detector's default channels).
    ///
    /// With a channel prefix configured, names become
    /// `{channel_prefix}{channel}_{name}`.
    ///
    /// # Errors
    /// Returns [`Error::CapacityExceeded`] if `limit_rois` is set and a
    /// channel has no free hardware slot. Channels processed before the
    /// failing one keep their new ROI.
    pub fn add(
        &mut self,
        ev_low: f64,
        ev_high: f64,
        name: &str,
        channels: Option<&[u32]>,
    ) -> Result<Vec<(u32, u32)>> {
        let channels: Vec<u32> = channels.map_or_else(|| self.default_channels.clone(), <[u32]>::to_vec);

        let mut placed = Vec::with_capacity(channels.len());
        for channel in channels {
            let slot = self.next_free_slot(channel);
            if self.limit_rois && slot > self.num_roi {
                return Err(self.capacity_error(channel, slot));
            }
            let roi_name = self.roi_name(channel, name);
            self.set(channel, slot, ev_low, ev_high, Some(&roi_name))?;
            placed.push((channel, slot));
        }
        Ok(placed)
    }

    /// Extracts ROI series from an archived capture.
    ///
    /// `rois` defaults to every stored definition. See [`extract_rois`].
    pub fn extract_from_archive<'a, O: ArchiveOpener>(
        &self,
        opener: &O,
        path: &Path,
        rois: Option<Vec<RoiInfo>>,
        control: &dyn AcquisitionControl,
        options: &'a ExtractOptions,
    ) -> Result<RoiExtraction<'a, O::Archive>> {
        let rois = rois.unwrap_or_else(|| self.all_rois().map(|r| r.info().clone()).collect());
        extract_rois(opener, path, rois, control, options)
    }

    fn next_free_slot(&self, channel: u32) -> u32 {
        let used = self.rois.get(&channel);
        (1..)
            .find(|slot| used.is_none_or(|m| !m.contains_key(slot)))
            .unwrap_or(u32::MAX)
    }

    fn roi_name(&self, channel: u32, name: &str) -> String {
        match &self.channel_prefix {
            Some(prefix) => format!("{prefix}{channel}_{name}"),
            None => name.to_string(),
        }
    }

    fn capacity_error(&self, channel: u32, slot: u32) -> Error {
        Error::CapacityExceeded {
            channel,
            slot,
            capacity: self.num_roi,
        }
    }

    fn check_address(&self, channel: u32, slot: u32) -> Result<()> {
        if channel == 0 || channel > self.num_channels {
            return Err(Error::ConfigError(format!(
                "channel {channel} outside 1..={}",
                self.num_channels
            )));
        }
        if slot == 0 {
            return Err(Error::ConfigError("ROI slots start at 1".into()));
        }
        Ok(())
    }

    fn remove(&mut self, channel: u32, slot: u32) -> Result<()> {
        let Some(roi) = self.rois.get_mut(&channel).and_then(|m| m.remove(&slot)) else {
            return Ok(());
        };
        if let Some(hw) = roi.into_hardware() {
            hw.clear()?;
        }
        Ok(())
    }

    fn insert(
        &mut self,
        channel: u32,
        slot: u32,
        bounds: RoiBounds,
        name: Option<&str>,
    ) -> Result<()> {
        self.check_address(channel, slot)?;

        let hardware = if slot <= self.num_roi {
            let hw = HardwareRoi::new(Arc::clone(&self.signals), &self.prefix, channel, slot);
            hw.configure_bin(bounds.bin_low, bounds.bin_high)?;
            Some(hw)
        } else if self.limit_rois {
            return Err(self.capacity_error(channel, slot));
        } else {
            warn!(
                "ROI {} will be recorded in fly scans but will not be available for \
                 live preview (num_roi={})",
                name.unwrap_or("<unnamed>"),
                self.num_roi
            );
            None
        };

        let info = RoiInfo {
            channel,
            slot,
            name: name.map(str::to_string),
            bounds,
        };
        self.rois
            .entry(channel)
            .or_default()
            .insert(slot, RoiDefinition::new(info, hardware));
        Ok(())
    }
}
