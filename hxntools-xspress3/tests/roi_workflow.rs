#![allow(clippy::cast_precision_loss, clippy::unreadable_literal)]
use hxntools_core::{MemorySignals, SpectraShape, SpectrumCube, XRF_DATA_KEY};
use hxntools_xspress3::{
    ArchiveOpener, Error, ExtractOptions, OfflineControl, RoiBounds, RoiInfo, RoiSnapshot,
    Xspress3Config, Xspress3Detector,
};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const BINS: usize = 1024;

// Flat background of 1 count per bin plus a 100-count line at bin 640 (6.4 keV)
// scaled by point number.
fn capture(points: usize, channels: usize) -> SpectrumCube {
    let shape = SpectraShape {
        points,
        channels,
        bins: BINS,
    };
    SpectrumCube::from_fn(XRF_DATA_KEY, shape, |p, _, b| {
        if b == 640 {
            1.0 + 100.0 * (p + 1) as f64
        } else {
            1.0
        }
    })
}

/// Fails the first `failures` opens, as a file still held by the writer.
struct BusyFile {
    failures: AtomicU32,
    attempts: AtomicU32,
    cube: SpectrumCube,
}

impl BusyFile {
    fn new(failures: u32, cube: SpectrumCube) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            cube,
        }
    }
}

impl ArchiveOpener for BusyFile {
    type Archive = SpectrumCube;

    fn open(&self, _path: &Path) -> io::Result<SpectrumCube> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is locked",
            ));
        }
        Ok(self.cube.clone())
    }
}

fn detector(config: Xspress3Config) -> (Arc<MemorySignals>, Xspress3Detector) {
    let signals = Arc::new(MemorySignals::new());
    let det = Xspress3Detector::new("xspress3", signals.clone(), config).unwrap();
    (signals, det)
}

fn quick() -> ExtractOptions {
    ExtractOptions::default().with_retry_interval(Duration::from_millis(5))
}

#[test]
fn test_add_then_extract_from_busy_file() {
    let (signals, mut det) = detector(Xspress3Config::default().with_channel_prefix("Det"));
    det.rois_mut().add(6390.0, 6410.0, "Fe", None).unwrap();
    det.rois_mut().add(1000.0, 1100.0, "Al", Some(&[1])).unwrap();
    signals.seed(&det.addresses().num_images, 3_i64);

    let opener = BusyFile::new(1, capture(5, 3));
    let options = quick();
    let snapshots: Vec<RoiSnapshot> = det
        .read_archive(&opener, Path::new("/data/capture.h5"), None, &options)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(opener.attempts.load(Ordering::SeqCst), 2);
    // The detector was stopped once between attempts.
    assert_eq!(
        signals.writes_to(&det.addresses().capture),
        vec![hxntools_core::Value::Int(0)]
    );

    let names: Vec<_> = snapshots.iter().filter_map(RoiSnapshot::name).collect();
    assert_eq!(names, vec!["Det1_Al", "Det1_Fe", "Det2_Fe", "Det3_Fe"]);

    // Bins 639..641 cover the line; series truncated to the 3 acquired points.
    let fe = &snapshots[1];
    assert_eq!(fe.data, vec![102.0, 202.0, 302.0]);
    assert_eq!(snapshots[0].data, vec![10.0, 10.0, 10.0]);
}

#[test]
fn test_extract_fails_after_every_attempt() {
    let (_signals, mut det) = detector(Xspress3Config::default());
    det.rois_mut().set(1, 1, 6390.0, 6410.0, Some("Fe")).unwrap();

    let opener = BusyFile::new(u32::MAX, capture(2, 1));
    let options = quick().with_max_retries(4);
    let err = det
        .read_archive(&opener, Path::new("/data/capture.h5"), None, &options)
        .unwrap_err();

    assert!(matches!(err, Error::ArchiveUnavailable { .. }));
    assert!(err.to_string().contains("file is locked"));
    assert_eq!(opener.attempts.load(Ordering::SeqCst), 4);
}

#[test]
fn test_extract_cancelled_while_waiting() {
    let opener = BusyFile::new(u32::MAX, capture(2, 1));
    let cancel = Arc::new(AtomicBool::new(false));
    let options = ExtractOptions::default()
        .with_max_retries(1000)
        .with_retry_interval(Duration::from_secs(10))
        .with_cancel(Arc::clone(&cancel));

    let canceller = {
        let cancel = Arc::clone(&cancel);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.store(true, Ordering::SeqCst);
        })
    };

    let rois = vec![RoiInfo {
        channel: 1,
        slot: 1,
        name: Some("Fe".into()),
        bounds: RoiBounds::from_energy(6390, 6410),
    }];
    let result = hxntools_xspress3::extract_rois(
        &opener,
        Path::new("/data/capture.h5"),
        rois,
        &OfflineControl::default(),
        &options,
    );
    canceller.join().unwrap();

    assert!(matches!(result, Err(Error::Interrupted { .. })));
    assert_eq!(opener.attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_offline_rois_are_extracted_but_not_programmed() {
    let config = Xspress3Config::default().with_num_roi(1);
    let (signals, mut det) = detector(config);
    det.rois_mut().add(6390.0, 6410.0, "Fe", Some(&[1])).unwrap();
    signals.clear_journal();
    det.rois_mut().add(0.0, 100.0, "Low", Some(&[1])).unwrap();
    assert!(signals.writes().is_empty());

    let opener = BusyFile::new(0, capture(2, 1));
    let options = quick();
    let snapshots: Vec<_> = det
        .read_archive(&opener, Path::new("a.h5"), None, &options)
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].name(), Some("Low"));
    assert_eq!(snapshots[1].data, vec![10.0, 10.0]);
}

#[test]
fn test_strict_limit_across_channels() {
    let config = Xspress3Config::default()
        .with_num_roi(2)
        .with_limit_rois(true);
    let (_signals, mut det) = detector(config);
    det.rois_mut().add(1000.0, 2000.0, "a", Some(&[1, 2])).unwrap();
    det.rois_mut().add(3000.0, 4000.0, "b", Some(&[1, 2])).unwrap();
    assert!(matches!(
        det.rois_mut().set(2, 3, 5000.0, 6000.0, Some("c")),
        Err(Error::CapacityExceeded {
            channel: 2,
            slot: 3,
            capacity: 2
        })
    ));
    assert_eq!(det.rois().len(), 4);
    assert!(det.rois().all_rois().all(|r| r.hardware().is_some()));

    det.rois_mut().clear_all(None).unwrap();
    assert!(det.rois().is_empty());
}

#[test]
fn test_extract_explicit_subset() {
    let (_signals, mut det) = detector(Xspress3Config::default());
    det.rois_mut().add(6390.0, 6410.0, "Fe", None).unwrap();
    let subset: Vec<RoiInfo> = det
        .rois()
        .all_rois()
        .filter(|r| r.channel() == 2)
        .map(|r| r.info().clone())
        .collect();

    let opener = BusyFile::new(0, capture(1, 3));
    let options = quick().with_wait(false);
    let extraction = det
        .read_archive(&opener, Path::new("a.h5"), Some(subset), &options)
        .unwrap();
    let snapshots: Vec<_> = extraction.map(Result::unwrap).collect();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].channel(), 2);
    assert_eq!(snapshots[0].total(), 102.0);
}
