//! Configuration module for Beacon.
//!
//! Loads the target list from a YAML file, with environment variable overrides
//! and sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default probe timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
/// Default refresh interval in seconds.
pub const DEFAULT_INTERVAL_SECS: f64 = 5.0;
/// Shortest timeout or interval accepted, in seconds.
pub const MIN_TIMING_SECS: f64 = 0.001;
/// Longest timeout or interval accepted, in seconds.
pub const MAX_TIMING_SECS: f64 = 86_400.0;
/// Default capacity of the in-memory log ring.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;
/// Config file used when neither `--config` nor `BEACON_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "beacon.yaml";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One monitored endpoint as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_secs: f64,
    pub interval_secs: f64,
    /// Text the response body must contain for the check to pass.
    pub assert_text: Option<String>,
    /// Invert the outcome: the check passes when the request fails.
    pub should_fail: bool,
    pub follow_redirects: bool,
    pub skip_ssl_verify: bool,
    /// Keep request/response headers and bodies on each result.
    pub capture: bool,
    pub regions: Vec<String>,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            interval_secs: DEFAULT_INTERVAL_SECS,
            assert_text: None,
            should_fail: false,
            follow_redirects: true,
            skip_ssl_verify: false,
            capture: false,
            regions: Vec::new(),
        }
    }
}

impl TargetSpec {
    /// Convenience constructor used by tests and the sample config.
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Probe timeout. Out-of-range values are clamped even if the spec was built by hand.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(clamp_timing(self.timeout_secs, DEFAULT_TIMEOUT_SECS))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(clamp_timing(self.interval_secs, DEFAULT_INTERVAL_SECS))
    }

    pub fn is_https(&self) -> bool {
        self.url.starts_with("https://")
    }

    /// Replace non-positive or non-finite timings with the defaults and clamp
    /// the rest into `[MIN_TIMING_SECS, MAX_TIMING_SECS]`.
    fn normalize(&mut self) {
        self.timeout_secs = clamp_timing(self.timeout_secs, DEFAULT_TIMEOUT_SECS);
        self.interval_secs = clamp_timing(self.interval_secs, DEFAULT_INTERVAL_SECS);
        if self.method.trim().is_empty() {
            self.method = "GET".to_string();
        }
        self.method = self.method.to_ascii_uppercase();
    }
}

fn clamp_timing(secs: f64, default: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 {
        secs.clamp(MIN_TIMING_SECS, MAX_TIMING_SECS)
    } else {
        default
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Regions applied to every target that does not list its own.
    pub regions: Vec<String>,
    pub log_capacity: usize,
    pub targets: Vec<TargetSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            targets: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit argument, then `BEACON_CONFIG`, then
    /// `beacon.yaml` in the working directory.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| env::var("BEACON_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// Environment variables:
    /// - `BEACON_LOG_CAPACITY`: capacity of the log ring (default: 1000)
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_yaml(&raw)?;

        if let Ok(capacity) = env::var("BEACON_LOG_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                cfg.log_capacity = capacity;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and normalise a YAML document without touching the environment.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = serde_yaml::from_str(raw)?;
        for target in &mut cfg.targets {
            target.normalize();
        }
        cfg.regions.retain(|r| !r.trim().is_empty());
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".to_string()));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::Invalid("log_capacity must be positive".to_string()));
        }
        for (i, target) in self.targets.iter().enumerate() {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("target #{} has no name", i + 1)));
            }
            if !(target.url.starts_with("http://") || target.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "target {} has unsupported url {:?}",
                    target.name, target.url
                )));
            }
        }
        Ok(())
    }
}
