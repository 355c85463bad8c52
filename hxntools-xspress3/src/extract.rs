//! ROI extraction from archived captures.
//!
//! The capture file may still be held by the writer when extraction starts,
//! so opening is retried a configurable number of times. Between attempts the
//! acquisition is stopped (best effort) in case the writer is what keeps the
//! file busy. Waiting can be cancelled from another thread.

use crate::config::Xspress3Config;
use crate::roi::{RoiInfo, RoiSnapshot};
use crate::{Error, Result};
use hxntools_core::{ArchiveOpener, SpectrumArchive};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Slice used when polling the cancel flag during a retry pause.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Acquisition hooks used while waiting on an archive.
pub trait AcquisitionControl {
    /// Stops file capture and acquisition so the writer releases the file.
    fn stop_acquisition(&self) -> hxntools_core::Result<()>;

    /// Points acquired in the current capture, if known.
    fn num_points(&self) -> Option<usize>;
}

/// Control for archives with no live detector behind them.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineControl {
    pub num_points: Option<usize>,
}

impl OfflineControl {
    #[must_use]
    pub fn new(num_points: Option<usize>) -> Self {
        Self { num_points }
    }
}

impl AcquisitionControl for OfflineControl {
    fn stop_acquisition(&self) -> hxntools_core::Result<()> {
        Ok(())
    }

    fn num_points(&self) -> Option<usize> {
        self.num_points
    }
}

/// Options for [`extract_rois`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Retry when the archive cannot be opened.
    pub wait: bool,
    /// Total open attempts when `wait` is set.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Dataset holding the spectra.
    pub data_key: String,
    /// Limit on points per series; defaults to the control's point count.
    pub max_points: Option<usize>,
    /// Set to `true` to abandon waiting.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from_config(&Xspress3Config::default())
    }
}

impl ExtractOptions {
    /// Options carrying the retry policy and data key of `config`.
    #[must_use]
    pub fn from_config(config: &Xspress3Config) -> Self {
        Self {
            wait: true,
            max_retries: config.retry.max_retries,
            retry_interval: config.retry.interval(),
            data_key: config.data_key.clone(),
            max_points: None,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = key.into();
        self
    }

    #[must_use]
    pub fn with_max_points(mut self, points: usize) -> Self {
        self.max_points = Some(points);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Sleeps for the retry interval, returning `false` if cancelled.
    fn pause(&self) -> bool {
        let deadline = Instant::now() + self.retry_interval;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

/// Opens `path`, retrying per `options`.
///
/// # Errors
/// [`Error::ArchiveUnavailable`] once attempts are exhausted (immediately when
/// `wait` is off), or [`Error::Interrupted`] if cancelled while waiting.
pub fn open_archive<O: ArchiveOpener>(
    opener: &O,
    path: &Path,
    control: &dyn AcquisitionControl,
    options: &ExtractOptions,
) -> Result<O::Archive> {
    let attempts = if options.wait { options.max_retries } else { 1 };
    let mut last_error = String::from("no open attempts were made");

    for attempt in 1..=attempts {
        if options.is_cancelled() {
            return Err(Error::Interrupted {
                path: path.to_path_buf(),
            });
        }

        match opener.open(path) {
            Ok(archive) => {
                if attempt > 1 {
                    info!("opened {} after {attempt} attempts", path.display());
                } else {
                    debug!("opened {}", path.display());
                }
                return Ok(archive);
            }
            Err(err) => {
                last_error = err.to_string();
                if !options.wait {
                    break;
                }
                if attempt == 1 {
                    warn!(
                        "unable to open {} ({err}); retrying up to {} times",
                        path.display(),
                        attempts
                    );
                }
                if attempt == attempts {
                    break;
                }
                if !options.pause() {
                    return Err(Error::Interrupted {
                        path: path.to_path_buf(),
                    });
                }
                if let Err(stop_err) = control.stop_acquisition() {
                    warn!("failed to stop acquisition: {stop_err}");
                }
            }
        }
    }

    Err(Error::ArchiveUnavailable {
        path: path.to_path_buf(),
        reason: last_error,
    })
}

/// Opens the archive at `path` and returns a lazy iterator of per-ROI series,
/// ordered by ROI name.
///
/// Opening happens up front; each ROI is read when the iterator reaches it.
/// A failing ROI yields an [`Error::Extraction`] item and iteration continues.
///
/// # Errors
/// Errors from [`open_archive`].
pub fn extract_rois<'a, O: ArchiveOpener>(
    opener: &O,
    path: &Path,
    mut rois: Vec<RoiInfo>,
    control: &dyn AcquisitionControl,
    options: &'a ExtractOptions,
) -> Result<RoiExtraction<'a, O::Archive>> {
    let archive = open_archive(opener, path, control, options)?;
    rois.sort_by(|a, b| a.name.cmp(&b.name));

    let max_points = options
        .max_points
        .or_else(|| control.num_points())
        .unwrap_or(usize::MAX);
    info!(
        "extracting {} ROIs from {}",
        rois.len(),
        path.display()
    );

    Ok(RoiExtraction {
        archive,
        path: path.to_path_buf(),
        rois: rois.into_iter(),
        data_key: &options.data_key,
        max_points,
    })
}

/// Lazy per-ROI extraction over an opened archive.
#[derive(Debug)]
pub struct RoiExtraction<'a, A> {
    archive: A,
    path: PathBuf,
    rois: std::vec::IntoIter<RoiInfo>,
    data_key: &'a str,
    max_points: usize,
}

impl<A> RoiExtraction<'_, A> {
    /// Path of the opened archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The opened archive.
    pub fn archive(&self) -> &A {
        &self.archive
    }
}

impl<A: SpectrumArchive> Iterator for RoiExtraction<'_, A> {
    type Item = Result<RoiSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        let info = self.rois.next()?;
        let series = self.archive.roi_series(
            self.data_key,
            info.channel,
            info.bounds.bin_low,
            info.bounds.bin_high,
            self.max_points,
        );
        Some(match series {
            Ok(data) => Ok(RoiSnapshot { info, data }),
            Err(source) => Err(Error::Extraction {
                roi: info.label().to_string(),
                source,
            }),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rois.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::RoiBounds;
    use hxntools_core::{ExtractionError, SpectraShape, SpectrumCube, XRF_DATA_KEY};
    use std::cell::Cell;
    use std::io;

    struct Flaky {
        failures: Cell<u32>,
        opened: Cell<u32>,
        cube: SpectrumCube,
    }

    impl Flaky {
        #[allow(clippy::cast_precision_loss)]
        fn new(failures: u32) -> Self {
            let shape = SpectraShape {
                points: 4,
                channels: 2,
                bins: 8,
            };
            Self {
                failures: Cell::new(failures),
                opened: Cell::new(0),
                cube: SpectrumCube::from_fn(XRF_DATA_KEY, shape, |p, c, _| {
                    (p + 10 * c) as f64
                }),
            }
        }
    }

    impl ArchiveOpener for Flaky {
        type Archive = SpectrumCube;

        fn open(&self, _path: &Path) -> io::Result<SpectrumCube> {
            self.opened.set(self.opened.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "locked"));
            }
            Ok(self.cube.clone())
        }
    }

    #[derive(Default)]
    struct CountingControl {
        stops: Cell<u32>,
    }

    impl AcquisitionControl for CountingControl {
        fn stop_acquisition(&self) -> hxntools_core::Result<()> {
            self.stops.set(self.stops.get() + 1);
            Ok(())
        }

        fn num_points(&self) -> Option<usize> {
            None
        }
    }

    fn fast() -> ExtractOptions {
        ExtractOptions::default().with_retry_interval(Duration::from_millis(1))
    }

    fn roi(channel: u32, name: &str, low: i64, high: i64) -> RoiInfo {
        RoiInfo {
            channel,
            slot: 1,
            name: Some(name.to_string()),
            bounds: RoiBounds::from_bins(low, high),
        }
    }

    #[test]
    fn test_open_succeeds_after_retry() {
        let opener = Flaky::new(1);
        let control = CountingControl::default();
        open_archive(&opener, Path::new("a.h5"), &control, &fast()).unwrap();
        assert_eq!(opener.opened.get(), 2);
        assert_eq!(control.stops.get(), 1);
    }

    #[test]
    fn test_open_exhausts_retries() {
        let opener = Flaky::new(10);
        let control = CountingControl::default();
        let err = open_archive(&opener, Path::new("a.h5"), &control, &fast()).unwrap_err();
        assert!(matches!(err, Error::ArchiveUnavailable { .. }));
        assert_eq!(opener.opened.get(), 2);
        assert_eq!(control.stops.get(), 1);
    }

    #[test]
    fn test_open_without_wait_fails_fast() {
        let opener = Flaky::new(1);
        let control = CountingControl::default();
        let options = fast().with_wait(false);
        let err = open_archive(&opener, Path::new("a.h5"), &control, &options).unwrap_err();
        assert!(matches!(err, Error::ArchiveUnavailable { .. }));
        assert_eq!(opener.opened.get(), 1);
        assert_eq!(control.stops.get(), 0);
    }

    #[test]
    fn test_zero_retries_never_opens() {
        let opener = Flaky::new(0);
        let options = fast().with_max_retries(0);
        let err = open_archive(&opener, Path::new("a.h5"), &OfflineControl::default(), &options)
            .unwrap_err();
        assert!(matches!(err, Error::ArchiveUnavailable { .. }));
        assert_eq!(opener.opened.get(), 0);
    }

    #[test]
    fn test_cancel_before_open() {
        let opener = Flaky::new(0);
        let cancel = Arc::new(AtomicBool::new(true));
        let options = fast().with_cancel(cancel);
        let err = open_archive(&opener, Path::new("a.h5"), &OfflineControl::default(), &options)
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted { .. }));
    }

    #[test]
    fn test_extract_sorted_by_name() {
        let opener = Flaky::new(0);
        let options = fast();
        let control = OfflineControl::default();
        let rois = vec![roi(2, "Zn", 0, 2), roi(1, "Ca", 0, 1), roi(1, "Fe", 2, 4)];

        let snapshots: Vec<_> = extract_rois(&opener, Path::new("a.h5"), rois, &control, &options)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let names: Vec<_> = snapshots.iter().filter_map(RoiSnapshot::name).collect();
        assert_eq!(names, vec!["Ca", "Fe", "Zn"]);

        // Channel 1 is index 0: each bin holds the point number.
        assert_eq!(snapshots[0].data, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(snapshots[1].data, vec![0.0, 2.0, 4.0, 6.0]);
        // Channel 2 adds 10 per bin.
        assert_eq!(snapshots[2].data, vec![20.0, 22.0, 24.0, 26.0]);
    }

    #[test]
    fn test_extract_truncates_to_point_count() {
        let opener = Flaky::new(0);
        let options = fast();
        let control = OfflineControl::new(Some(2));
        let mut extraction = extract_rois(
            &opener,
            Path::new("a.h5"),
            vec![roi(1, "Ca", 0, 1)],
            &control,
            &options,
        )
        .unwrap();
        assert_eq!(extraction.next().unwrap().unwrap().data.len(), 2);
        assert!(extraction.next().is_none());
    }

    #[test]
    fn test_extract_reports_bad_roi_and_continues() {
        let opener = Flaky::new(0);
        let options = fast();
        let control = OfflineControl::default();
        let rois = vec![roi(5, "Bad", 0, 1), roi(1, "Good", 0, 1)];

        let results: Vec<_> = extract_rois(&opener, Path::new("a.h5"), rois, &control, &options)
            .unwrap()
            .collect();
        assert!(matches!(
            &results[0],
            Err(Error::Extraction {
                source: ExtractionError::ChannelOutOfRange { channel: 5, .. },
                ..
            })
        ));
        assert!(results[1].is_ok());
    }
}
