//! Archived spectra access.
//!
//! An archive is a completed capture holding one raw MCA spectrum per point
//! per channel, laid out as `(points, channels, bins)`. ROI extraction sums a
//! bin window of one channel for every point.

use crate::ExtractionError;
use std::io;
use std::path::Path;

/// Default location of the spectra dataset inside an Xspress3 capture.
pub const XRF_DATA_KEY: &str = "entry/instrument/detector/data";

/// Registry handler name for Xspress3 HDF5 captures.
pub const XSPRESS3_HANDLER: &str = "XSP3";

/// Dimensions of an archived spectra cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectraShape {
    pub points: usize,
    pub channels: usize,
    pub bins: usize,
}

impl SpectraShape {
    /// Builds a shape from a raw dataset shape.
    pub fn from_dims(key: &str, dims: &[usize]) -> Result<Self, ExtractionError> {
        match *dims {
            [points, channels, bins] => Ok(Self {
                points,
                channels,
                bins,
            }),
            _ => Err(ExtractionError::InvalidShape {
                key: key.to_string(),
                shape: dims.to_vec(),
            }),
        }
    }

    /// Total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points * self.channels * self.bins
    }

    /// True if the cube holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates a 1-based channel and a bin window, returning the zero-based
    /// channel index and the bin range.
    pub fn check_roi(
        &self,
        channel: u32,
        bin_low: i64,
        bin_high: i64,
    ) -> Result<(usize, std::ops::Range<usize>), ExtractionError> {
        let index = usize::try_from(channel)
            .ok()
            .and_then(|c| c.checked_sub(1))
            .filter(|&c| c < self.channels)
            .ok_or(ExtractionError::ChannelOutOfRange {
                channel,
                channels: self.channels,
            })?;

        let invalid = || ExtractionError::InvalidBins {
            low: bin_low,
            high: bin_high,
            bins: self.bins,
        };
        let low = usize::try_from(bin_low).map_err(|_| invalid())?;
        let high = usize::try_from(bin_high).map_err(|_| invalid())?;
        if low > high || high > self.bins {
            return Err(invalid());
        }
        Ok((index, low..high))
    }
}

/// Read access to an opened archive.
pub trait SpectrumArchive {
    /// Shape of the spectra dataset selected by `data_key`.
    fn shape(&self, data_key: &str) -> Result<SpectraShape, ExtractionError>;

    /// Per-point sums of bins `[bin_low, bin_high)` on a 1-based `channel`,
    /// limited to the first `max_points` points.
    fn roi_series(
        &self,
        data_key: &str,
        channel: u32,
        bin_low: i64,
        bin_high: i64,
        max_points: usize,
    ) -> Result<Vec<f64>, ExtractionError>;

    /// Full spectrum of one point on a 1-based `channel`.
    fn spectrum(&self, data_key: &str, frame: usize, channel: u32)
        -> Result<Vec<f64>, ExtractionError>;
}

/// Opens archives by path.
///
/// An `Err` means the file could not be opened at the OS level (missing, or
/// still held by the writer) and is the only condition callers retry on.
pub trait ArchiveOpener {
    type Archive: SpectrumArchive;

    /// Opens `path` read-only.
    fn open(&self, path: &Path) -> io::Result<Self::Archive>;
}

/// In-memory spectra cube stored row-major as `(points, channels, bins)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumCube {
    key: String,
    shape: SpectraShape,
    data: Vec<f64>,
}

impl SpectrumCube {
    /// Wraps `data` under `key`; `data.len()` must equal `shape.len()`.
    pub fn new(
        key: impl Into<String>,
        shape: SpectraShape,
        data: Vec<f64>,
    ) -> Result<Self, ExtractionError> {
        let key = key.into();
        if data.len() != shape.len() {
            return Err(ExtractionError::Read(format!(
                "{} samples do not fill a {}x{}x{} cube",
                data.len(),
                shape.points,
                shape.channels,
                shape.bins
            )));
        }
        Ok(Self { key, shape, data })
    }

    /// Builds a cube by evaluating `f(point, channel, bin)` with zero-based
    /// indices.
    pub fn from_fn(
        key: impl Into<String>,
        shape: SpectraShape,
        mut f: impl FnMut(usize, usize, usize) -> f64,
    ) -> Self {
        let mut data = Vec::with_capacity(shape.len());
        for point in 0..shape.points {
            for channel in 0..shape.channels {
                for bin in 0..shape.bins {
                    data.push(f(point, channel, bin));
                }
            }
        }
        Self {
            key: key.into(),
            shape,
            data,
        }
    }

    /// Dataset key the cube answers to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw row-major samples.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn check_key(&self, data_key: &str) -> Result<(), ExtractionError> {
        if data_key == self.key {
            Ok(())
        } else {
            Err(ExtractionError::MissingDataset(data_key.to_string()))
        }
    }

    fn row(&self, point: usize, channel: usize) -> &[f64] {
        let start = (point * self.shape.channels + channel) * self.shape.bins;
        &self.data[start..start + self.shape.bins]
    }
}

impl SpectrumArchive for SpectrumCube {
    fn shape(&self, data_key: &str) -> Result<SpectraShape, ExtractionError> {
        self.check_key(data_key)?;
        Ok(self.shape)
    }

    fn roi_series(
        &self,
        data_key: &str,
        channel: u32,
        bin_low: i64,
        bin_high: i64,
        max_points: usize,
    ) -> Result<Vec<f64>, ExtractionError> {
        self.check_key(data_key)?;
        let (channel, bins) = self.shape.check_roi(channel, bin_low, bin_high)?;
        let points = self.shape.points.min(max_points);
        Ok((0..points)
            .map(|point| self.row(point, channel)[bins.clone()].iter().sum())
            .collect())
    }

    fn spectrum(
        &self,
        data_key: &str,
        frame: usize,
        channel: u32,
    ) -> Result<Vec<f64>, ExtractionError> {
        self.check_key(data_key)?;
        let (channel, _) = self.shape.check_roi(channel, 0, 0)?;
        if frame >= self.shape.points {
            return Err(ExtractionError::FrameOutOfRange {
                frame,
                points: self.shape.points,
            });
        }
        Ok(self.row(frame, channel).to_vec())
    }
}
