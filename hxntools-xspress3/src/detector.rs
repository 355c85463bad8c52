//! Xspress3 detector handle.

use crate::config::Xspress3Config;
use crate::extract::{AcquisitionControl, ExtractOptions, RoiExtraction};
use crate::roi::RoiInfo;
use crate::rois::RoiRegistry;
use crate::Result;
use hxntools_core::scan::{ModalDetector, ModeSettings, TriggerMode};
use hxntools_core::{ArchiveOpener, SignalIo, Value};
use log::debug;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Trigger mode string for hardware-gated acquisition.
pub const TRIGGER_TTL_VETO: &str = "TTL Veto Only";
/// Trigger mode string for software-timed acquisition.
pub const TRIGGER_INTERNAL: &str = "Internal";

/// Control-point addresses of the detector and its HDF5 file plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorAddresses {
    pub acquire: String,
    pub trigger_mode: String,
    pub num_images: String,
    pub erase: String,
    pub capture: String,
    pub capture_rbv: String,
    pub file_template: String,
    pub file_number: String,
    pub file_enable: String,
    pub file_path: String,
    pub file_name: String,
    pub file_path_exists: String,
    pub array_width: String,
}

impl DetectorAddresses {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let hdf5 = format!("{prefix}HDF5:");
        Self {
            acquire: format!("{prefix}Acquire"),
            trigger_mode: format!("{prefix}TriggerMode"),
            num_images: format!("{prefix}NumImages"),
            erase: format!("{prefix}ERASE"),
            capture: format!("{hdf5}Capture"),
            capture_rbv: format!("{hdf5}Capture_RBV"),
            file_template: format!("{hdf5}FileTemplate"),
            file_number: format!("{hdf5}FileNumber"),
            file_enable: format!("{hdf5}EnableCallbacks"),
            file_path: format!("{hdf5}FilePath"),
            file_name: format!("{hdf5}FileName"),
            file_path_exists: format!("{hdf5}FilePathExists_RBV"),
            array_width: format!("{hdf5}ArraySize0_RBV"),
        }
    }
}

/// A Quantum Detectors Xspress3 MCA detector.
///
/// Owns its ROI registry; the registry holds only the signal handle and
/// never refers back to the detector.
pub struct Xspress3Detector {
    name: String,
    config: Xspress3Config,
    signals: Arc<dyn SignalIo>,
    addresses: DetectorAddresses,
    rois: RoiRegistry,
}

impl fmt::Debug for Xspress3Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xspress3Detector")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("rois", &self.rois)
            .finish_non_exhaustive()
    }
}

impl Xspress3Detector {
    /// Creates a detector named `name`.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid.
    pub fn new(
        name: impl Into<String>,
        signals: Arc<dyn SignalIo>,
        config: Xspress3Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            addresses: DetectorAddresses::new(&config.prefix),
            rois: RoiRegistry::new(Arc::clone(&signals), &config),
            signals,
            config,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &Xspress3Config {
        &self.config
    }

    #[must_use]
    pub fn addresses(&self) -> &DetectorAddresses {
        &self.addresses
    }

    #[must_use]
    pub fn signals(&self) -> &Arc<dyn SignalIo> {
        &self.signals
    }

    #[must_use]
    pub fn rois(&self) -> &RoiRegistry {
        &self.rois
    }

    pub fn rois_mut(&mut self) -> &mut RoiRegistry {
        &mut self.rois
    }

    /// Channels 1 through `num_channels`.
    pub fn channels(&self) -> impl Iterator<Item = u32> {
        1..=self.config.num_channels
    }

    /// Sets the trigger mode string.
    pub fn set_trigger_mode(&self, mode: &str) -> hxntools_core::Result<()> {
        self.signals
            .put(&self.addresses.trigger_mode, Value::from(mode), false)
    }

    /// Sets the number of frames to acquire.
    pub fn set_num_images(&self, points: usize) -> hxntools_core::Result<()> {
        let points = i64::try_from(points).unwrap_or(i64::MAX);
        self.signals
            .put(&self.addresses.num_images, Value::Int(points), false)
    }

    /// Extracts ROI series from an archived capture of this detector.
    ///
    /// The detector supplies the point count and is stopped between retries.
    pub fn read_archive<'a, O: ArchiveOpener>(
        &self,
        opener: &O,
        path: &Path,
        rois: Option<Vec<RoiInfo>>,
        options: &'a ExtractOptions,
    ) -> Result<RoiExtraction<'a, O::Archive>> {
        self.rois
            .extract_from_archive(opener, path, rois, self, options)
    }
}

impl AcquisitionControl for Xspress3Detector {
    fn stop_acquisition(&self) -> hxntools_core::Result<()> {
        self.signals.put(&self.addresses.capture, Value::Int(0), false)?;
        self.signals.put(&self.addresses.acquire, Value::Int(0), false)
    }

    fn num_points(&self) -> Option<usize> {
        let images = self.signals.get_int(&self.addresses.num_images).ok()?;
        usize::try_from(images).ok().filter(|&n| n > 0)
    }
}

impl ModalDetector for Xspress3Detector {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_mode(&mut self, settings: &ModeSettings) -> hxntools_core::Result<()> {
        debug!("{}: {} triggering", self.name, settings.mode);
        let mode = match settings.mode {
            TriggerMode::Internal => TRIGGER_INTERNAL,
            TriggerMode::External => TRIGGER_TTL_VETO,
        };
        self.set_trigger_mode(mode)?;
        self.set_num_images(settings.total_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxntools_core::scan::{scan_setup, ScanType};
    use hxntools_core::MemorySignals;

    fn detector() -> (Arc<MemorySignals>, Xspress3Detector) {
        let signals = Arc::new(MemorySignals::new());
        let det = Xspress3Detector::new("xspress3", signals.clone(), Xspress3Config::default())
            .unwrap();
        (signals, det)
    }

    #[test]
    fn test_addresses() {
        let addr = DetectorAddresses::new("XF:03IDC-ES{Xsp:1}:");
        assert_eq!(addr.capture, "XF:03IDC-ES{Xsp:1}:HDF5:Capture");
        assert_eq!(addr.acquire, "XF:03IDC-ES{Xsp:1}:Acquire");
    }

    #[test]
    fn test_stop_acquisition_order() {
        let (signals, det) = detector();
        det.stop_acquisition().unwrap();
        let writes = signals.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].address, det.addresses().capture);
        assert_eq!(writes[1].address, det.addresses().acquire);
        assert_eq!(writes[1].value, Value::Int(0));
    }

    #[test]
    fn test_num_points() {
        let (signals, det) = detector();
        assert_eq!(det.num_points(), None);
        signals.seed(&det.addresses().num_images, 12_i64);
        assert_eq!(det.num_points(), Some(12));
    }

    #[test]
    fn test_scan_setup_ends_external() {
        let (signals, mut det) = detector();
        scan_setup(&mut [&mut det], 25).unwrap();

        let modes = signals.writes_to(&det.addresses().trigger_mode);
        assert_eq!(
            modes,
            vec![Value::from(TRIGGER_INTERNAL), Value::from(TRIGGER_TTL_VETO)]
        );
        assert_eq!(det.num_points(), Some(25));

        det.apply_mode(&ModeSettings {
            mode: TriggerMode::Internal,
            scan_type: ScanType::Fly,
            total_points: 3,
        })
        .unwrap();
        assert_eq!(
            signals.peek(&det.addresses().trigger_mode),
            Some(Value::from(TRIGGER_INTERNAL))
        );
    }

    #[test]
    fn test_manual_trigger_setup() {
        let (signals, det) = detector();
        det.set_trigger_mode(TRIGGER_TTL_VETO).unwrap();
        det.set_num_images(40).unwrap();
        assert_eq!(
            signals.peek(&det.addresses().trigger_mode),
            Some(Value::from(TRIGGER_TTL_VETO))
        );
        assert_eq!(det.num_points(), Some(40));

        det.set_num_images(0).unwrap();
        assert_eq!(det.num_points(), None);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let signals = Arc::new(MemorySignals::new());
        let config = Xspress3Config::default().with_num_roi(0);
        assert!(Xspress3Detector::new("xs", signals, config).is_err());
    }
}
