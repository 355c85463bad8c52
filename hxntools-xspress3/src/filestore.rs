//! File-store bookkeeping for Xspress3 captures.
//!
//! The detector's HDF5 plugin writes one file per run. The file is registered
//! as a resource with the data registry and every point of every channel as a
//! datum `{frame, channel}` inside it, so readers can resolve event values
//! back to spectra.

use crate::detector::{DetectorAddresses, Xspress3Detector, TRIGGER_INTERNAL, TRIGGER_TTL_VETO};
use crate::{Error, Result};
use hxntools_core::{DataRegistry, ResourceId, SignalIo, Value, XSPRESS3_HANDLER};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// File-name template handed to the IOC's HDF5 plugin (printf style).
pub const IOC_FILE_TEMPLATE: &str = "%s%s_%6.6d.h5";

const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// Capture file name: `{path}{name}_{seq:06}.h5`.
#[must_use]
pub fn capture_file_name(path: &str, name: &str, seq: u32) -> String {
    format!("{path}{name}_{seq:06}.h5")
}

/// Datum key for one spectrum: `ch{chan}_spectrum_{seq:05}-{uuid}`.
#[must_use]
pub fn datum_key(channel: u32, seq: usize, uid: &Uuid) -> String {
    format!("ch{channel}_spectrum_{seq:05}-{uid}")
}

/// A datum reference reported for one point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: String,
    pub timestamp: f64,
}

/// Description of one per-channel spectrum field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub external: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub source: String,
}

/// Registers Xspress3 captures and their datums.
pub struct Xspress3FileStore {
    det_name: String,
    addresses: DetectorAddresses,
    signals: Arc<dyn SignalIo>,
    registry: Arc<dyn DataRegistry>,
    channels: Vec<u32>,
    file_path: PathBuf,
    ioc_file_path: String,
    settle: Duration,
    store_filename: Option<PathBuf>,
    ioc_filename: Option<String>,
    resource: Option<ResourceId>,
    trigger_count: usize,
}

impl std::fmt::Debug for Xspress3FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xspress3FileStore")
            .field("det_name", &self.det_name)
            .field("file_path", &self.file_path)
            .field("ioc_file_path", &self.ioc_file_path)
            .field("resource", &self.resource)
            .field("trigger_count", &self.trigger_count)
            .finish_non_exhaustive()
    }
}

impl Xspress3FileStore {
    /// Creates a file store for `det`.
    ///
    /// `file_path` is where this host sees captures; `ioc_file_path` is the
    /// same directory as the IOC sees it.
    pub fn new(
        det: &Xspress3Detector,
        registry: Arc<dyn DataRegistry>,
        file_path: impl Into<PathBuf>,
        ioc_file_path: impl Into<String>,
    ) -> Self {
        Self {
            det_name: det.name().to_string(),
            addresses: det.addresses().clone(),
            signals: Arc::clone(det.signals()),
            registry,
            channels: det.channels().collect(),
            file_path: file_path.into(),
            ioc_file_path: with_separator(ioc_file_path.into()),
            settle: Duration::from_millis(100),
            store_filename: None,
            ioc_filename: None,
            resource: None,
            trigger_count: 0,
        }
    }

    /// Builder: pause after stopping acquisition before reconfiguring.
    #[must_use]
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Resource of the current capture, once configured.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceId> {
        self.resource.as_ref()
    }

    /// Capture path as seen from this host.
    #[must_use]
    pub fn store_filename(&self) -> Option<&Path> {
        self.store_filename.as_deref()
    }

    /// Capture path as seen from the IOC.
    #[must_use]
    pub fn ioc_filename(&self) -> Option<&str> {
        self.ioc_filename.as_deref()
    }

    fn field_key(&self, channel: u32) -> String {
        format!("{}_ch{channel}", self.det_name)
    }

    fn put(&self, address: &str, value: impl Into<Value>, wait: bool) -> Result<()> {
        self.signals.put(address, value.into(), wait)?;
        Ok(())
    }

    fn current_resource(&self) -> Result<ResourceId> {
        self.resource
            .clone()
            .ok_or_else(|| Error::ConfigError("file store is not configured".into()))
    }

    /// Arms the detector for a hardware-triggered run of `total_points`.
    ///
    /// Picks a fresh file name, points the HDF5 plugin at it, registers the
    /// resource, erases old spectra, and starts acquisition and capture.
    ///
    /// # Errors
    /// Fails if the IOC reports the capture directory missing, or on any
    /// signal or registry error.
    pub fn configure(&mut self, total_points: usize) -> Result<()> {
        debug!("Stopping xspress3 acquisition");
        self.put(&self.addresses.acquire, 0_i64, false)?;
        thread::sleep(self.settle);

        debug!("Setting up triggering");
        self.put(&self.addresses.trigger_mode, TRIGGER_TTL_VETO, false)?;
        let points = i64::try_from(total_points).unwrap_or(i64::MAX);
        self.put(&self.addresses.num_images, points, false)?;

        let name = Uuid::new_v4().to_string();
        std::fs::create_dir_all(&self.file_path)?;
        let store = self.file_path.join(capture_file_name("", &name, 0));
        let ioc = capture_file_name(&self.ioc_file_path, &name, 0);

        debug!(
            "Setting up hdf5 plugin: ioc path: {} filename: {name}",
            self.ioc_file_path
        );
        self.put(&self.addresses.file_template, IOC_FILE_TEMPLATE, true)?;
        self.put(&self.addresses.file_number, 0_i64, false)?;
        self.put(&self.addresses.file_enable, 1_i64, false)?;
        self.put(&self.addresses.file_path, self.ioc_file_path.as_str(), true)?;
        self.put(&self.addresses.file_name, name.as_str(), true)?;

        if self.signals.get_int(&self.addresses.file_path_exists)? == 0 {
            return Err(hxntools_core::Error::Device {
                address: self.addresses.file_path.clone(),
                message: format!("path {} does not exist on IOC", self.ioc_file_path),
            }
            .into());
        }

        debug!("Inserting the filestore resource");
        let resource = self.registry.insert_resource(
            XSPRESS3_HANDLER,
            &store.to_string_lossy(),
            Map::new(),
        )?;

        debug!("Erasing old spectra");
        self.put(&self.addresses.erase, 1_i64, false)?;

        debug!("Starting acquisition");
        self.put(&self.addresses.acquire, 1_i64, false)?;
        self.put(&self.addresses.capture, 1_i64, false)?;

        self.resource = Some(resource);
        self.store_filename = Some(store);
        self.ioc_filename = Some(ioc);
        self.trigger_count = 0;
        Ok(())
    }

    /// Waits for the HDF5 plugin to finish writing, then restores internal
    /// triggering.
    ///
    /// Setting `cancel` abandons the wait; triggering is restored regardless.
    pub fn deconfigure(&mut self, cancel: Option<&AtomicBool>) -> Result<()> {
        let mut warned = false;
        while self.signals.get_int(&self.addresses.capture_rbv)? == 1 {
            if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                warn!("Still capturing data .... interrupted.");
                break;
            }
            if !warned {
                warn!("Still capturing data .... waiting.");
                warned = true;
            }
            thread::sleep(CAPTURE_POLL);
        }

        self.put(&self.addresses.trigger_mode, TRIGGER_INTERNAL, false)
    }

    /// Registers one datum per channel for the next point.
    pub fn read(&mut self) -> Result<BTreeMap<String, Reading>> {
        let resource = self.current_resource()?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let seq = self.trigger_count;

        let mut values = BTreeMap::new();
        for &channel in &self.channels {
            let key = datum_key(channel, seq, &Uuid::new_v4());
            self.registry
                .insert_datum(&resource, &key, datum_kwargs(seq, channel))?;
            values.insert(
                self.field_key(channel),
                Reading {
                    value: key,
                    timestamp,
                },
            );
        }

        self.trigger_count += 1;
        Ok(values)
    }

    /// Registers `count` points per channel at once, returning the datum
    /// ids per field.
    pub fn bulk_read(&self, count: usize) -> Result<BTreeMap<String, Vec<String>>> {
        let resource = self.current_resource()?;

        let mut values = BTreeMap::new();
        for &channel in &self.channels {
            let ids = (0..count)
                .map(|seq| -> Result<String> {
                    let uid = Uuid::new_v4().to_string();
                    self.registry
                        .insert_datum(&resource, &uid, datum_kwargs(seq, channel))?;
                    Ok(uid)
                })
                .collect::<Result<Vec<_>>>()?;
            values.insert(self.field_key(channel), ids);
        }
        Ok(values)
    }

    /// Describes the per-channel spectrum fields.
    ///
    /// May be called before [`configure`](Self::configure), in which case the
    /// source carries no resource id.
    pub fn describe(&self) -> Result<BTreeMap<String, FieldDescriptor>> {
        let width = self.signals.get_int(&self.addresses.array_width)?;
        let width = usize::try_from(width).unwrap_or_default();
        let source = match &self.resource {
            Some(id) => format!("FileStore:{id}"),
            None => "FileStore:".to_string(),
        };

        let descriptor = FieldDescriptor {
            external: "FILESTORE:".to_string(),
            dtype: "array".to_string(),
            shape: vec![width],
            source,
        };
        Ok(self
            .channels
            .iter()
            .map(|&channel| (self.field_key(channel), descriptor.clone()))
            .collect())
    }
}

fn datum_kwargs(frame: usize, channel: u32) -> Map<String, serde_json::Value> {
    let mut kwargs = Map::new();
    kwargs.insert("frame".into(), json!(frame));
    kwargs.insert("channel".into(), json!(channel));
    kwargs
}

fn with_separator(mut path: String) -> String {
    if !path.is_empty() && !path.ends_with('/') {
        path.push('/');
    }
    path
}
