//! hxntools CLI.
//!
//! Inspects archived Xspress3 captures and extracts ROI series from them.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use hxntools_core::{MemorySignals, SpectrumArchive};
use hxntools_io::{Hdf5ArchiveOpener, Xspress3Hdf5Handler};
use hxntools_xspress3::{ExtractOptions, OfflineControl, RoiRegistry, Xspress3Config};
use log::{info, warn};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    HxnIo(#[from] hxntools_io::Error),

    #[error("{0}")]
    Xspress3(#[from] hxntools_xspress3::Error),

    #[error("Extraction error: {0}")]
    Extraction(#[from] hxntools_core::ExtractionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// ROI requested on the command line as `NAME:CH:EV_LOW:EV_HIGH`.
#[derive(Debug, Clone, PartialEq)]
struct RoiArg {
    name: String,
    channel: u32,
    ev_low: f64,
    ev_high: f64,
}

impl FromStr for RoiArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [name, channel, ev_low, ev_high] = parts[..] else {
            return Err(format!("expected NAME:CH:EV_LOW:EV_HIGH, got {s:?}"));
        };
        if name.is_empty() {
            return Err("ROI name must not be empty".to_string());
        }
        let channel = channel
            .parse()
            .map_err(|e| format!("invalid channel {channel:?}: {e}"))?;
        let ev_low = ev_low
            .parse()
            .map_err(|e| format!("invalid low energy {ev_low:?}: {e}"))?;
        let ev_high = ev_high
            .parse()
            .map_err(|e| format!("invalid high energy {ev_high:?}: {e}"))?;
        Ok(Self {
            name: name.to_string(),
            channel,
            ev_low,
            ev_high,
        })
    }
}

/// Xspress3 capture tools for the HXN beamline.
#[derive(Parser)]
#[command(name = "hxntools")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the spectra layout of a capture
    Info {
        /// Capture file
        archive: PathBuf,

        /// Dataset holding the spectra
        #[arg(long)]
        data_key: Option<String>,
    },

    /// Extract ROI series from a capture
    Extract {
        /// Capture file
        archive: PathBuf,

        /// ROI as NAME:CH:EV_LOW:EV_HIGH (repeatable)
        #[arg(long = "roi", required = true)]
        rois: Vec<RoiArg>,

        /// Detector configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of acquired points; series are truncated to it
        #[arg(long)]
        points: Option<usize>,

        /// Fail immediately if the capture cannot be opened
        #[arg(long)]
        no_wait: bool,

        /// Open attempts before giving up
        #[arg(long)]
        max_retries: Option<u32>,

        /// Dataset holding the spectra
        #[arg(long)]
        data_key: Option<String>,

        /// Print full series as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { archive, data_key } => {
            let handler = Xspress3Hdf5Handler::open(&archive)?;
            let key = data_key.unwrap_or_else(|| hxntools_core::XRF_DATA_KEY.to_string());
            let shape = handler.shape(&key)?;

            println!("File: {}", archive.display());
            println!("Dataset: {}", key);
            println!("Points: {}", shape.points);
            println!("Channels: {}", shape.channels);
            println!("Bins: {}", shape.bins);
        }

        Commands::Extract {
            archive,
            rois,
            config,
            points,
            no_wait,
            max_retries,
            data_key,
            json,
        } => {
            let config = match config {
                Some(path) => Xspress3Config::from_file(path)?,
                None => Xspress3Config::default(),
            };

            // Offline registry: definitions only, nothing reaches hardware.
            let mut registry = RoiRegistry::new(Arc::new(MemorySignals::new()), &config);
            for roi in &rois {
                registry.add(roi.ev_low, roi.ev_high, &roi.name, Some(&[roi.channel]))?;
            }

            let mut options = ExtractOptions::from_config(&config).with_wait(!no_wait);
            if let Some(retries) = max_retries {
                options = options.with_max_retries(retries);
            }
            if let Some(key) = data_key {
                options = options.with_data_key(key);
            }
            let control = OfflineControl::new(points);

            let start = Instant::now();
            let extraction = registry.extract_from_archive(
                &Hdf5ArchiveOpener,
                &archive,
                None,
                &control,
                &options,
            )?;

            let mut failed = 0usize;
            for item in extraction {
                let snapshot = match item {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("{e}");
                        failed += 1;
                        continue;
                    }
                };
                let bounds = snapshot.info.bounds;
                if json {
                    let record = serde_json::json!({
                        "name": snapshot.name(),
                        "channel": snapshot.channel(),
                        "ev_low": bounds.ev_low,
                        "ev_high": bounds.ev_high,
                        "data": snapshot.data,
                    });
                    println!("{}", serde_json::to_string(&record)?);
                } else {
                    println!(
                        "{:<16} ch{:<2} {:>6}-{:<6} eV  points={:<6} total={:.0}",
                        snapshot.name().unwrap_or(""),
                        snapshot.channel(),
                        bounds.ev_low,
                        bounds.ev_high,
                        snapshot.data.len(),
                        snapshot.total()
                    );
                }
            }

            info!(
                "extracted {} ROIs ({} failed) in {:.2}s",
                rois.len() - failed,
                failed,
                start.elapsed().as_secs_f64()
            );
        }
    }

    Ok(())
}
