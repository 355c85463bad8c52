//! Merlin detector handle.
//!
//! Trigger-mode changes only record staging values; nothing reaches the
//! device until [`MerlinDetector::stage`]. Staging writes the camera settings,
//! then the HDF5 plugin settings with `Capture` last, and registers the file
//! with the data registry.

use crate::config::{check_count_time, MerlinConfig};
use crate::stage::{StageSigs, Staged};
use crate::{Error, Result};
use hxntools_core::scan::{ModalDetector, ModeSettings, TriggerMode};
use hxntools_core::{DataRegistry, ResourceId, SignalIo};
use log::{debug, info};
use serde_json::{json, Map};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Registry handler name for Merlin HDF5 captures.
pub const MERLIN_HANDLER: &str = "TPX_HDF5";

/// File-name template handed to the IOC's HDF5 plugin (printf style).
pub const IOC_FILE_TEMPLATE: &str = "%s%s_%6.6d.h5";

/// Exposure for externally triggered points (s). Acts as a debounce and must
/// stay below half the expected exposure.
pub const EXTERNAL_ACQUIRE_TIME: f64 = 0.005;
/// Frame period for externally triggered points (s).
pub const EXTERNAL_ACQUIRE_PERIOD: f64 = 0.006_639_2;
/// Readout gap added to the exposure in internal mode (s).
pub const INTERNAL_READOUT_GAP: f64 = 0.005;

/// Control-point addresses of the camera and its HDF5 file plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerlinAddresses {
    pub acquire_time: String,
    pub acquire_period: String,
    pub num_images: String,
    pub enable: String,
    pub file_path: String,
    pub file_name: String,
    pub file_number: String,
    pub file_template: String,
    pub file_write_mode: String,
    pub compression: String,
    pub num_capture: String,
    pub capture: String,
}

impl MerlinAddresses {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let cam = format!("{prefix}cam1:");
        let hdf = format!("{prefix}HDF1:");
        Self {
            acquire_time: format!("{cam}AcquireTime"),
            acquire_period: format!("{cam}AcquirePeriod"),
            num_images: format!("{cam}NumImages"),
            enable: format!("{hdf}EnableCallbacks"),
            file_path: format!("{hdf}FilePath"),
            file_name: format!("{hdf}FileName"),
            file_number: format!("{hdf}FileNumber"),
            file_template: format!("{hdf}FileTemplate"),
            file_write_mode: format!("{hdf}FileWriteMode"),
            compression: format!("{hdf}Compression"),
            num_capture: format!("{hdf}NumCapture"),
            capture: format!("{hdf}Capture"),
        }
    }
}

/// File registered for the current staging.
#[derive(Debug)]
struct Capture {
    resource: ResourceId,
    filename: PathBuf,
    point: usize,
}

/// A Merlin photon-counting area detector with an HDF5 file plugin.
pub struct MerlinDetector {
    name: String,
    config: MerlinConfig,
    signals: Arc<dyn SignalIo>,
    registry: Arc<dyn DataRegistry>,
    addresses: MerlinAddresses,
    settings: Option<ModeSettings>,
    cam_sigs: StageSigs,
    staged: Option<Staged>,
    capture: Option<Capture>,
}

impl fmt::Debug for MerlinDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerlinDetector")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("settings", &self.settings)
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}

impl MerlinDetector {
    /// Creates a detector named `name`.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid.
    pub fn new(
        name: impl Into<String>,
        signals: Arc<dyn SignalIo>,
        registry: Arc<dyn DataRegistry>,
        config: MerlinConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            addresses: MerlinAddresses::new(&config.prefix),
            signals,
            registry,
            config,
            settings: None,
            cam_sigs: StageSigs::new(),
            staged: None,
            capture: None,
        })
    }

    #[must_use]
    pub fn addresses(&self) -> &MerlinAddresses {
        &self.addresses
    }

    #[must_use]
    pub fn count_time(&self) -> f64 {
        self.config.count_time
    }

    /// Changes the exposure used by the next internal-mode setup.
    pub fn set_count_time(&mut self, count_time: f64) -> Result<()> {
        check_count_time(count_time)?;
        self.config.count_time = count_time;
        Ok(())
    }

    /// Mode settings last applied, if any.
    #[must_use]
    pub fn settings(&self) -> Option<&ModeSettings> {
        self.settings.as_ref()
    }

    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }

    /// Resource of the current capture, while staged.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceId> {
        self.capture.as_ref().map(|c| &c.resource)
    }

    /// Capture path as seen from this host, while staged.
    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.capture.as_ref().map(|c| c.filename.as_path())
    }

    /// Frames written per scan point: one when externally triggered,
    /// otherwise the camera's image count.
    pub fn frames_per_point(&self) -> Result<u64> {
        match self.settings.as_ref().map(|s| s.mode) {
            Some(TriggerMode::External) => Ok(1),
            _ => {
                let images = self.signals.get_int(&self.addresses.num_images)?;
                Ok(u64::try_from(images).unwrap_or_default())
            }
        }
    }

    fn plugin_sigs(&self, total_points: usize, filename: &str) -> StageSigs {
        let a = &self.addresses;
        let mut sigs = StageSigs::new();
        sigs.set(&a.enable, 1_i64);
        sigs.set(&a.file_path, self.config.write_path.as_str());
        sigs.set(&a.file_name, filename);
        sigs.set(&a.file_number, 0_i64);
        sigs.set(&a.file_template, IOC_FILE_TEMPLATE);
        sigs.set(&a.file_write_mode, "Stream");
        sigs.set(&a.compression, "zlib");
        sigs.set(&a.capture, 1_i64);
        sigs.set(
            &a.num_capture,
            i64::try_from(total_points).unwrap_or(i64::MAX),
        );
        // Capture starts the file; everything else must be in place first.
        sigs.move_to_end(&a.capture);
        sigs
    }

    /// Applies the staged camera settings, arms the HDF5 plugin and registers
    /// the capture file.
    ///
    /// # Errors
    /// Fails if no trigger mode has been applied, if the detector is already
    /// staged, or on any directory, signal or registry error. Signals are
    /// restored on failure.
    pub fn stage(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(Error::AlreadyStaged(self.name.clone()));
        }
        let total_points = self
            .settings
            .as_ref()
            .map(|s| s.total_points)
            .ok_or_else(|| Error::NoMode(self.name.clone()))?;

        let name = Uuid::new_v4().to_string();
        if self.config.make_directories {
            std::fs::create_dir_all(&self.config.read_path)?;
        }
        let filename = self.config.read_path.join(format!("{name}_000000.h5"));

        let mut sigs = self.cam_sigs.clone();
        sigs.extend(&self.plugin_sigs(total_points, &name));
        let staged = sigs.apply(self.signals.as_ref())?;

        let mut kwargs = Map::new();
        kwargs.insert("frame_per_point".to_string(), json!(1));
        debug!("Inserting resource with filename {}", filename.display());
        let resource =
            match self
                .registry
                .insert_resource(MERLIN_HANDLER, &filename.to_string_lossy(), kwargs)
            {
                Ok(resource) => resource,
                Err(e) => {
                    staged.restore(self.signals.as_ref())?;
                    return Err(e.into());
                }
            };

        self.staged = Some(staged);
        self.capture = Some(Capture {
            resource,
            filename,
            point: 0,
        });
        Ok(())
    }

    /// Registers a datum for the next point and returns its id.
    pub fn read(&mut self) -> Result<String> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| Error::NotStaged(self.name.clone()))?;

        let datum_id = Uuid::new_v4().to_string();
        let mut kwargs = Map::new();
        kwargs.insert("point_number".to_string(), json!(capture.point));
        self.registry
            .insert_datum(&capture.resource, &datum_id, kwargs)?;
        capture.point += 1;
        Ok(datum_id)
    }

    /// Puts every staged signal back to its original value.
    pub fn unstage(&mut self) -> Result<()> {
        self.capture = None;
        match self.staged.take() {
            Some(staged) => Ok(staged.restore(self.signals.as_ref())?),
            None => Ok(()),
        }
    }
}

impl ModalDetector for MerlinDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_mode(&mut self, settings: &ModeSettings) -> hxntools_core::Result<()> {
        info!("{} {} triggering ({:?})", self.name, settings.mode, settings);
        let (acquire_time, acquire_period) = match settings.mode {
            TriggerMode::Internal => {
                let count_time = self.config.count_time;
                (count_time, count_time + INTERNAL_READOUT_GAP)
            }
            TriggerMode::External => (EXTERNAL_ACQUIRE_TIME, EXTERNAL_ACQUIRE_PERIOD),
        };
        self.cam_sigs.set(&self.addresses.acquire_time, acquire_time);
        self.cam_sigs
            .set(&self.addresses.acquire_period, acquire_period);
        self.settings = Some(settings.clone());
        Ok(())
    }
}
