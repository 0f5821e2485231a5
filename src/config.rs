use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::CollectorError;
use crate::export::CsvOptions;
use crate::system::history::PeakMetric;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const POLL_INTERVAL_ENV: &str = "ONLOOKER_POLL_INTERVAL";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub poll_interval_ms: u64,
    pub output_dir: PathBuf,
    pub session_log: bool,
    pub log_process_list_changes: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            output_dir: PathBuf::from("."),
            session_log: true,
            log_process_list_changes: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub csv_noise_floor_bytes: u64,
    pub peak_metric: PeakMetric,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let csv = CsvOptions::default();
        ExportConfig {
            csv_noise_floor_bytes: csv.noise_floor_bytes,
            peak_metric: csv.metric,
        }
    }
}

impl ExportConfig {
    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            metric: self.peak_metric,
            noise_floor_bytes: self.csv_noise_floor_bytes,
        }
    }
}

impl Config {
    /// The configured interval, or the default when it is zero.
    pub fn poll_interval(&self) -> Duration {
        match self.general.poll_interval_ms {
            0 => Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            ms => Duration::from_millis(ms),
        }
    }

    /// Applies a textual interval override. Invalid values select the default
    /// interval.
    pub fn apply_poll_interval_override(&mut self, raw: &str) {
        self.general.poll_interval_ms = match parse_poll_interval(raw) {
            Ok(ms) => ms,
            Err(err) => {
                tracing::warn!(error = %err, "using default poll interval");
                DEFAULT_POLL_INTERVAL_MS
            }
        };
    }

    /// Reads the interval override from the environment, once.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(POLL_INTERVAL_ENV) {
            self.apply_poll_interval_override(&raw);
        }
    }
}

/// Milliseconds from text. Anything that is not a positive integer is rejected.
pub fn parse_poll_interval(raw: &str) -> Result<u64, CollectorError> {
    let invalid = || CollectorError::ConfigParse {
        key: POLL_INTERVAL_ENV,
        value: raw.to_string(),
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(ms) => Ok(ms),
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("onlooker").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}
