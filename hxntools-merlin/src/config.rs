//! Detector configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Merlin detector configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MerlinConfig {
    /// Process-variable prefix of the detector IOC, e.g. `XF:03IDC-ES{Merlin:1}`.
    pub prefix: String,
    /// Capture directory as the IOC sees it.
    pub write_path: String,
    /// The same directory as this host sees it.
    pub read_path: PathBuf,
    /// Create `read_path` before each capture.
    pub make_directories: bool,
    /// Exposure per point (s) for internally triggered acquisition.
    pub count_time: f64,
}

impl Default for MerlinConfig {
    fn default() -> Self {
        Self::hxn_defaults()
    }
}

impl MerlinConfig {
    /// HXN beamline defaults.
    #[must_use]
    pub fn hxn_defaults() -> Self {
        Self {
            prefix: "XF:03IDC-ES{Merlin:1}".to_string(),
            write_path: "/data/merlin/".to_string(),
            read_path: PathBuf::from("/data/merlin"),
            make_directories: true,
            count_time: 1.0,
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the exposure time and paths.
    pub fn validate(&self) -> Result<()> {
        check_count_time(self.count_time)?;
        if self.write_path.is_empty() {
            return Err(Error::ConfigError("write_path must not be empty".into()));
        }
        Ok(())
    }

    /// Builder: set the capture directories (IOC view, host view).
    #[must_use]
    pub fn with_paths(mut self, write_path: impl Into<String>, read_path: impl Into<PathBuf>) -> Self {
        self.write_path = write_path.into();
        self.read_path = read_path.into();
        self
    }

    /// Builder: set the exposure time.
    #[must_use]
    pub fn with_count_time(mut self, count_time: f64) -> Self {
        self.count_time = count_time;
        self
    }
}

pub(crate) fn check_count_time(count_time: f64) -> Result<()> {
    if count_time.is_finite() && count_time > 0.0 {
        Ok(())
    } else {
        Err(Error::ConfigError(format!(
            "count_time must be positive, got {count_time}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_partial_config() {
        let config = MerlinConfig::from_json(
            r#"{ "prefix": "XF:03IDC-ES{Merlin:2}", "count_time": 0.05 }"#,
        )
        .unwrap();
        assert_eq!(config.prefix, "XF:03IDC-ES{Merlin:2}");
        assert!((config.count_time - 0.05).abs() < f64::EPSILON);
        assert!(config.make_directories);
        assert_eq!(config.write_path, "/data/merlin/");
    }

    #[test]
    fn test_rejects_bad_count_time() {
        for json in [r#"{ "count_time": 0.0 }"#, r#"{ "count_time": -1.0 }"#] {
            assert!(matches!(
                MerlinConfig::from_json(json),
                Err(Error::ConfigError(_))
            ));
        }
        assert!(MerlinConfig::default()
            .with_count_time(f64::NAN)
            .validate()
            .is_err());
    }
}
