//! Detector configuration.

use crate::{Error, Result};
use hxntools_core::XRF_DATA_KEY;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// Retry policy for opening an archive still held by the writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total open attempts.
    pub max_retries: u32,
    /// Pause between attempts in milliseconds.
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            interval_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Pause between attempts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Xspress3 detector configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Xspress3Config {
    /// Process-variable prefix of the detector IOC, e.g. `XF:03IDC-ES{Xsp:1}:`.
    pub prefix: String,
    /// Number of MCA channels on the detector.
    pub num_channels: u32,
    /// Hardware ROI slots per channel.
    pub num_roi: u32,
    /// Channels used when an ROI is added without naming channels.
    pub default_channels: Vec<u32>,
    /// Reject ROIs beyond `num_roi` instead of keeping them offline-only.
    pub limit_rois: bool,
    /// When set, added ROI names become `{channel_prefix}{channel}_{name}`.
    pub channel_prefix: Option<String>,
    /// Dataset holding raw spectra inside captures.
    pub data_key: String,
    /// Archive-open retry policy.
    pub retry: RetryConfig,
}

impl Default for Xspress3Config {
    fn default() -> Self {
        Self::hxn_defaults()
    }
}

impl Xspress3Config {
    /// HXN beamline defaults: 8 channels, 16 ROIs each, channels 1-3 active.
    #[must_use]
    pub fn hxn_defaults() -> Self {
        Self {
            prefix: "XF:03IDC-ES{Xsp:1}:".to_string(),
            num_channels: 8,
            num_roi: 16,
            default_channels: vec![1, 2, 3],
            limit_rois: false,
            channel_prefix: None,
            data_key: XRF_DATA_KEY.to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
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

    /// Checks channel and ROI counts.
    ///
    /// This is called automatically when loading from JSON.
    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 {
            return Err(Error::ConfigError("num_channels must be at least 1".into()));
        }
        if self.num_roi == 0 {
            return Err(Error::ConfigError("num_roi must be at least 1".into()));
        }
        if let Some(&bad) = self
            .default_channels
            .iter()
            .find(|&&c| c == 0 || c > self.num_channels)
        {
            return Err(Error::ConfigError(format!(
                "default channel {bad} outside 1..={}",
                self.num_channels
            )));
        }
        Ok(())
    }

    /// Builder: set the strict ROI-limit policy.
    #[must_use]
    pub fn with_limit_rois(mut self, limit: bool) -> Self {
        self.limit_rois = limit;
        self
    }

    /// Builder: set the hardware ROI capacity.
    #[must_use]
    pub fn with_num_roi(mut self, num_roi: u32) -> Self {
        self.num_roi = num_roi;
        self
    }

    /// Builder: set the channel prefix used for ROI names.
    #[must_use]
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    /// Builder: set the default channel list.
    #[must_use]
    pub fn with_default_channels(mut self, channels: Vec<u32>) -> Self {
        self.default_channels = channels;
        self
    }
}
