//! HDF5 spectra archives written by the Xspress3 file plugin.
//!
//! Captures hold a `(points, channels, bins)` dataset of raw MCA counts,
//! by default at [`XRF_DATA_KEY`].

use crate::{Error, Result};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group};
use hxntools_core::{
    ArchiveOpener, ExtractionError, SpectraShape, SpectrumArchive, XRF_DATA_KEY, XSPRESS3_HANDLER,
};
use log::debug;
use ndarray::{s, ArrayView3, Axis};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Read-only handle on an Xspress3 capture.
///
/// Registered with the data registry under the `XSP3` handler; datums
/// `{frame, channel}` resolve to single spectra.
pub struct Xspress3Hdf5Handler {
    file: File,
    path: PathBuf,
    data_key: String,
}

impl std::fmt::Debug for Xspress3Hdf5Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xspress3Hdf5Handler")
            .field("path", &self.path)
            .field("data_key", &self.data_key)
            .finish_non_exhaustive()
    }
}

impl Xspress3Hdf5Handler {
    /// Registry handler name.
    pub const HANDLER_NAME: &'static str = XSPRESS3_HANDLER;

    /// Opens `path` read-only with the default data key.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened as HDF5.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!("opened capture {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            data_key: XRF_DATA_KEY.to_string(),
        })
    }

    /// Builder: resolve datums against `key` instead of the default.
    #[must_use]
    pub fn with_data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = key.into();
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a datum `{frame, channel}` to its spectrum.
    ///
    /// # Errors
    /// Returns an error if the frame or channel is outside the capture.
    pub fn datum(&self, frame: usize, channel: u32) -> Result<Vec<f64>> {
        Ok(self.spectrum(&self.data_key, frame, channel)?)
    }

    fn dataset(&self, data_key: &str) -> std::result::Result<Dataset, ExtractionError> {
        self.file
            .dataset(data_key)
            .map_err(|_| ExtractionError::MissingDataset(data_key.to_string()))
    }

    fn dataset_shape(
        &self,
        data_key: &str,
    ) -> std::result::Result<(Dataset, SpectraShape), ExtractionError> {
        let dataset = self.dataset(data_key)?;
        let shape = SpectraShape::from_dims(data_key, &dataset.shape())?;
        Ok((dataset, shape))
    }
}

fn read_error(err: &hdf5::Error) -> ExtractionError {
    ExtractionError::Read(err.to_string())
}

impl SpectrumArchive for Xspress3Hdf5Handler {
    fn shape(&self, data_key: &str) -> std::result::Result<SpectraShape, ExtractionError> {
        Ok(self.dataset_shape(data_key)?.1)
    }

    fn roi_series(
        &self,
        data_key: &str,
        channel: u32,
        bin_low: i64,
        bin_high: i64,
        max_points: usize,
    ) -> std::result::Result<Vec<f64>, ExtractionError> {
        let (dataset, shape) = self.dataset_shape(data_key)?;
        let (channel, bins) = shape.check_roi(channel, bin_low, bin_high)?;
        let points = shape.points.min(max_points);
        if points == 0 || bins.is_empty() {
            return Ok(vec![0.0; points]);
        }

        let window = dataset
            .read_slice_2d::<f64, _>(s![..points, channel, bins])
            .map_err(|e| read_error(&e))?;
        Ok(window.sum_axis(Axis(1)).to_vec())
    }

    fn spectrum(
        &self,
        data_key: &str,
        frame: usize,
        channel: u32,
    ) -> std::result::Result<Vec<f64>, ExtractionError> {
        let (dataset, shape) = self.dataset_shape(data_key)?;
        let (channel, _) = shape.check_roi(channel, 0, 0)?;
        if frame >= shape.points {
            return Err(ExtractionError::FrameOutOfRange {
                frame,
                points: shape.points,
            });
        }

        let spectrum = dataset
            .read_slice_1d::<f64, _>(s![frame, channel, ..])
            .map_err(|e| read_error(&e))?;
        Ok(spectrum.to_vec())
    }
}

/// Opens captures as [`Xspress3Hdf5Handler`]s.
///
/// Any open failure is reported as an I/O error so callers can retry while
/// the writer still holds the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5ArchiveOpener;

impl ArchiveOpener for Hdf5ArchiveOpener {
    type Archive = Xspress3Hdf5Handler;

    fn open(&self, path: &Path) -> io::Result<Xspress3Hdf5Handler> {
        Xspress3Hdf5Handler::open(path).map_err(|e| match e {
            Error::Io(err) => err,
            other => io::Error::other(other.to_string()),
        })
    }
}

/// Spectra write configuration.
#[derive(Clone, Debug)]
pub struct SpectraWriteOptions {
    /// Dataset path inside the file; intermediate groups are created.
    pub data_key: String,
    /// Chunk shape in `(points, channels, bins)`.
    pub chunk: Option<[usize; 3]>,
    pub compression: Option<u8>,
    pub shuffle: bool,
}

impl Default for SpectraWriteOptions {
    fn default() -> Self {
        Self {
            data_key: XRF_DATA_KEY.to_string(),
            chunk: None,
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// Writes a `(points, channels, bins)` cube of counts in the capture layout.
///
/// # Errors
/// Returns an error if `counts` does not fill `shape` or HDF5 I/O fails.
pub fn write_spectra_hdf5<P: AsRef<Path>>(
    path: P,
    shape: SpectraShape,
    counts: &[u32],
    options: &SpectraWriteOptions,
) -> Result<()> {
    let view = ArrayView3::from_shape((shape.points, shape.channels, shape.bins), counts)
        .map_err(|e| Error::InvalidFormat(format!("counts shape mismatch: {e}")))?;

    let (groups, name) = match options.data_key.rsplit_once('/') {
        Some((groups, name)) => (groups, name),
        None => ("", options.data_key.as_str()),
    };
    if name.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "invalid data key {:?}",
            options.data_key
        )));
    }

    let file = File::create(path)?;
    set_attr_str_file(&file, "hxntools_format_version", "0.1")?;

    let mut group: Group = file.as_group()?;
    for (depth, part) in groups.split('/').filter(|p| !p.is_empty()).enumerate() {
        group = group.create_group(part)?;
        if depth == 0 {
            set_attr_str_group(&group, "NX_class", "NXentry")?;
        }
    }

    let mut builder = group
        .new_dataset::<u32>()
        .shape((shape.points, shape.channels, shape.bins));
    if let Some(chunk) = options.chunk {
        builder = builder.chunk(chunk);
    }
    if let Some(level) = options.compression {
        builder = builder.deflate(level);
    }
    if options.shuffle {
        builder = builder.shuffle();
    }
    let dataset = builder.create(name)?;
    dataset.write(view)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shape() -> SpectraShape {
        SpectraShape {
            points: 3,
            channels: 2,
            bins: 16,
        }
    }

    // Counts encode (point, channel, bin) so sums are predictable.
    fn counts(shape: SpectraShape) -> Vec<u32> {
        let mut data = Vec::with_capacity(shape.len());
        for p in 0..shape.points {
            for c in 0..shape.channels {
                for b in 0..shape.bins {
                    data.push(u32::try_from(p * 100 + c * 10 + b).unwrap());
                }
            }
        }
        data
    }

    fn write_capture(dir: &Path, options: &SpectraWriteOptions) -> PathBuf {
        let path = dir.join("capture_000000.h5");
        write_spectra_hdf5(&path, shape(), &counts(shape()), options).unwrap();
        path
    }

    #[test]
    fn test_roi_series() {
        let dir = tempdir().unwrap();
        let path = write_capture(dir.path(), &SpectraWriteOptions::default());
        let handler = Xspress3Hdf5Handler::open(&path).unwrap();

        assert_eq!(handler.shape(XRF_DATA_KEY).unwrap(), shape());
        let series = handler
            .roi_series(XRF_DATA_KEY, 2, 2, 5, usize::MAX)
            .unwrap();
        // point 0, channel index 1: 12 + 13 + 14
        assert_eq!(series, vec![39.0, 339.0, 639.0]);

        let truncated = handler.roi_series(XRF_DATA_KEY, 1, 0, 1, 2).unwrap();
        assert_eq!(truncated, vec![0.0, 100.0]);

        let empty = handler.roi_series(XRF_DATA_KEY, 1, 4, 4, 10).unwrap();
        assert_eq!(empty, vec![0.0; 3]);
    }

    #[test]
    fn test_datum_resolves_spectrum() {
        let dir = tempdir().unwrap();
        let path = write_capture(dir.path(), &SpectraWriteOptions::default());
        let handler = Xspress3Hdf5Handler::open(&path).unwrap();

        let spectrum = handler.datum(2, 1).unwrap();
        assert_eq!(spectrum.len(), 16);
        assert_eq!(spectrum[5], 205.0);
        assert!(matches!(
            handler.datum(3, 1),
            Err(Error::Extraction(ExtractionError::FrameOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_invalid_requests() {
        let dir = tempdir().unwrap();
        let path = write_capture(dir.path(), &SpectraWriteOptions::default());
        let handler = Xspress3Hdf5Handler::open(&path).unwrap();

        assert!(matches!(
            handler.roi_series("entry/missing", 1, 0, 1, 10),
            Err(ExtractionError::MissingDataset(_))
        ));
        assert!(matches!(
            handler.roi_series(XRF_DATA_KEY, 3, 0, 1, 10),
            Err(ExtractionError::ChannelOutOfRange { .. })
        ));
        assert!(matches!(
            handler.roi_series(XRF_DATA_KEY, 1, 0, 17, 10),
            Err(ExtractionError::InvalidBins { .. })
        ));
    }

    #[test]
    fn test_custom_key_and_chunking() {
        let dir = tempdir().unwrap();
        let options = SpectraWriteOptions {
            data_key: "xrf/spectra".to_string(),
            chunk: Some([1, 2, 16]),
            compression: None,
            shuffle: false,
        };
        let path = write_capture(dir.path(), &options);
        let handler = Xspress3Hdf5Handler::open(&path)
            .unwrap()
            .with_data_key("xrf/spectra");

        assert!(handler.shape(XRF_DATA_KEY).is_err());
        assert_eq!(handler.datum(0, 2).unwrap()[0], 10.0);
    }

    #[test]
    fn test_wrong_rank_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.h5");
        let file = File::create(&path).unwrap();
        file.new_dataset::<u32>()
            .shape((4, 4))
            .create("data")
            .unwrap();
        drop(file);

        let handler = Xspress3Hdf5Handler::open(&path).unwrap();
        assert!(matches!(
            handler.shape("data"),
            Err(ExtractionError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_opener_reports_missing_file() {
        let dir = tempdir().unwrap();
        let result = Hdf5ArchiveOpener.open(&dir.path().join("absent.h5"));
        assert!(result.is_err());
    }

    #[test]
    fn test_write_rejects_short_counts() {
        let dir = tempdir().unwrap();
        let result = write_spectra_hdf5(
            dir.path().join("bad.h5"),
            shape(),
            &[0; 4],
            &SpectraWriteOptions::default(),
        );
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
