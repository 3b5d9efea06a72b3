use envconfig::Envconfig;
use std::net::SocketAddr;
use std::ops::{Deref, RangeInclusive};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::performance::hysteresis::Thresholds;
use crate::performance::sampler::SampleRanges;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// An inclusive range of sample values, written as `low:high` in the environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalRange {
    pub low: f64,
    pub high: f64,
}

impl SignalRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn as_range(&self) -> RangeInclusive<f64> {
        self.low..=self.high
    }
}

impl FromStr for SignalRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, high) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidRange(s.to_string()))?;
        let low = low
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidRange(s.to_string()))?;
        let high = high
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidRange(s.to_string()))?;
        if !low.is_finite() || !high.is_finite() || high < low {
            return Err(ConfigError::InvalidRange(s.to_string()));
        }
        Ok(SignalRange { low, high })
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid signal range '{0}', expected low:high")]
    InvalidRange(String),
    #[error("disarm threshold {disarm} must be strictly below arm threshold {arm}")]
    InvalidThresholds { arm: f64, disarm: f64 },
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    #[envconfig(from = "GATED_FLAG_KEY", default = "ai-chatbot")]
    pub gated_flag_key: String,

    #[envconfig(from = "MONITOR_INTERVAL_MS", default = "3000")]
    pub monitor_interval_ms: u64,

    #[envconfig(from = "ARM_THRESHOLD", default = "500")]
    pub arm_threshold: f64,

    #[envconfig(from = "DISARM_THRESHOLD", default = "300")]
    pub disarm_threshold: f64,

    #[envconfig(from = "HIGH_LOAD_RANGE", default = "600:900")]
    pub high_load_range: SignalRange,

    #[envconfig(from = "ENABLED_RANGE", default = "400:500")]
    pub enabled_range: SignalRange,

    #[envconfig(from = "BASELINE_RANGE", default = "80:150")]
    pub baseline_range: SignalRange,

    #[envconfig(from = "SAMPLE_WINDOW_SIZE", default = "10")]
    pub sample_window_size: usize,

    #[envconfig(from = "METRICS_QUEUE_CAPACITY", default = "1024")]
    pub metrics_queue_capacity: usize,

    // Empty means samples only go to the prometheus recorder
    #[envconfig(from = "METRICS_SINK_URL", default = "")]
    pub metrics_sink_url: String,

    #[envconfig(from = "METRICS_SINK_TIMEOUT_MS", default = "500")]
    pub metrics_sink_timeout_ms: u64,

    #[envconfig(from = "FLAG_DEFINITIONS_PATH", default = "")]
    pub flag_definitions_path: String,

    #[envconfig(default = "false")]
    pub enable_metrics: bool,

    #[envconfig(default = "1000")]
    pub max_concurrency: usize,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
            debug: FlexBool(false),
            gated_flag_key: "ai-chatbot".to_string(),
            monitor_interval_ms: 3000,
            arm_threshold: 500.0,
            disarm_threshold: 300.0,
            high_load_range: SignalRange::new(600.0, 900.0),
            enabled_range: SignalRange::new(400.0, 500.0),
            baseline_range: SignalRange::new(80.0, 150.0),
            sample_window_size: 10,
            metrics_queue_capacity: 1024,
            metrics_sink_url: "".to_string(),
            metrics_sink_timeout_ms: 500,
            flag_definitions_path: "".to_string(),
            enable_metrics: false,
            max_concurrency: 1000,
        }
    }

    /// Checks the relationships envconfig can't express on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds()?;
        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::MustBePositive("MONITOR_INTERVAL_MS"));
        }
        if self.sample_window_size == 0 {
            return Err(ConfigError::MustBePositive("SAMPLE_WINDOW_SIZE"));
        }
        if self.metrics_queue_capacity == 0 {
            return Err(ConfigError::MustBePositive("METRICS_QUEUE_CAPACITY"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::new(self.arm_threshold, self.disarm_threshold)
    }

    pub fn sample_ranges(&self) -> SampleRanges {
        SampleRanges {
            high_load: self.high_load_range,
            enabled: self.enabled_range,
            baseline: self.baseline_range,
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn metrics_sink_url(&self) -> Option<&str> {
        if self.metrics_sink_url.trim().is_empty() {
            None
        } else {
            Some(self.metrics_sink_url.trim())
        }
    }

    pub fn flag_definitions_path(&self) -> Option<&str> {
        if self.flag_definitions_path.trim().is_empty() {
            None
        } else {
            Some(self.flag_definitions_path.trim())
        }
    }
}
