use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alerting::domain::detection_event::Severity;
use crate::shared::constants::{
    DEFAULT_ALERT_DEBOUNCE_MS, DEFAULT_DETECTION_INTERVAL_MS, DEFAULT_HEAD_REGION_FRACTION,
    DEFAULT_HEAD_REGION_WIDTH_FRACTION, DEFAULT_HELMET_COLOR_RATIO_THRESHOLD,
    DEFAULT_STATUS_POLL_INTERVAL_MS, DEFAULT_STREAM_KEY, DEFAULT_WORKER, DEFAULT_ZONE,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {name} has invalid value {value:?}")]
    Env { name: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Tunables for one monitored stream.
///
/// Layered as: defaults, then the JSON config file, then `HARDHAT_*`
/// environment variables. The CLI applies its flags last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub detection_interval_ms: u64,
    pub alert_debounce_ms: u64,
    pub status_poll_interval_ms: u64,
    pub helmet_color_ratio_threshold: f64,
    pub head_region_fraction: f64,
    pub head_region_width_fraction: f64,
    /// Minimum detector score for a box to be reported.
    pub confidence: f64,
    pub zone: String,
    pub worker: String,
    pub severity: Severity,
    pub stream_key: String,
    pub model_url: Option<String>,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            alert_debounce_ms: DEFAULT_ALERT_DEBOUNCE_MS,
            status_poll_interval_ms: DEFAULT_STATUS_POLL_INTERVAL_MS,
            helmet_color_ratio_threshold: DEFAULT_HELMET_COLOR_RATIO_THRESHOLD,
            head_region_fraction: DEFAULT_HEAD_REGION_FRACTION,
            head_region_width_fraction: DEFAULT_HEAD_REGION_WIDTH_FRACTION,
            confidence: 0.5,
            zone: DEFAULT_ZONE.to_string(),
            worker: DEFAULT_WORKER.to_string(),
            severity: Severity::High,
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            model_url: None,
            snapshot_dir: None,
        }
    }
}

impl MonitorConfig {
    /// `~/.config/Hardhat/config.json` (platform equivalent elsewhere).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Hardhat").join("config.json"))
    }

    /// Loads the config file at `path`, or the default location when `None`.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Overrides fields from environment lookups. `lookup` is injectable so
    /// tests don't touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, "HARDHAT_DETECTION_INTERVAL_MS")? {
            self.detection_interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "HARDHAT_ALERT_DEBOUNCE_MS")? {
            self.alert_debounce_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "HARDHAT_STATUS_POLL_INTERVAL_MS")? {
            self.status_poll_interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "HARDHAT_HELMET_COLOR_RATIO_THRESHOLD")? {
            self.helmet_color_ratio_threshold = v;
        }
        if let Some(v) = parse_env(&lookup, "HARDHAT_HEAD_REGION_FRACTION")? {
            self.head_region_fraction = v;
        }
        if let Some(v) = lookup("HARDHAT_ZONE") {
            self.zone = v;
        }
        if let Some(v) = lookup("HARDHAT_WORKER") {
            self.worker = v;
        }
        if let Some(v) = lookup("HARDHAT_STREAM_KEY") {
            self.stream_key = v;
        }
        if let Some(v) = lookup("HARDHAT_MODEL_URL") {
            self.model_url = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detection_interval_ms must be positive".into(),
            ));
        }
        if self.status_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "status_poll_interval_ms must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.helmet_color_ratio_threshold) {
            return Err(ConfigError::Invalid(format!(
                "helmet_color_ratio_threshold must be between 0.0 and 1.0, got {}",
                self.helmet_color_ratio_threshold
            )));
        }
        for (name, value) in [
            ("head_region_fraction", self.head_region_fraction),
            ("head_region_width_fraction", self.head_region_width_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in (0.0, 1.0], got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::Invalid(format!(
                "confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        if self.stream_key.is_empty() {
            return Err(ConfigError::Invalid("stream_key must not be empty".into()));
        }
        Ok(())
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

fn parse_env<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { name, value: raw }),
    }
}
