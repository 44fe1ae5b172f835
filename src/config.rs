//! config.rs
//! Device configuration: container pins and dispense times, sensor pin, timing.
//!
//! Loaded from a JSON file (path from `DISPENSER_CONFIG`, default `dispenser.json`).
//! Any field left out keeps its default; a missing file means all defaults.
//! Times are 24-hour `H:M`; list a time twice to release two doses.
//!
//! ```json
//! {
//!   "utc_offset_hours": 1,
//!   "sensor_pin": 14,
//!   "containers": [
//!     { "pin": 5, "times": ["7:0", "19:30"] },
//!     { "pin": 4, "times": ["7:0"] }
//!   ]
//! }
//! ```

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::dispenser::{MotionProfile, MotionStep, ProfileError, RetryLimit};
use crate::dispenser::profile::{DEFAULT_PWM_FREQUENCY_HZ, DEFAULT_STEPS};
use crate::schedule::{Schedule, TimeOfDay, TimeParseError};

pub const CONFIG_ENV_VAR: &str = "DISPENSER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "dispenser.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no containers configured")]
    NoContainers,

    #[error("pin {pin} is assigned to more than one container")]
    DuplicatePin { pin: u8 },

    #[error("sensor pin {pin} is also used by a container servo")]
    SensorPinConflict { pin: u8 },

    #[error("container {slot}: {source}")]
    BadTime {
        slot: usize,
        #[source]
        source: TimeParseError,
    },

    #[error("invalid motion profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("utc_offset_hours {0} is outside -12..=14")]
    UtcOffset(i32),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub pin: u8,
    #[serde(default)]
    pub times: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub duty: u16,
    pub hold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub utc_offset_hours: i32,
    pub sensor_pin: u8,
    pub pwm_frequency_hz: u32,
    pub settle_delay_ms: u64,
    pub poll_period_secs: u64,
    pub http_addr: String,
    pub containers: Vec<ContainerConfig>,
    pub profile: Vec<StepConfig>,
    pub max_passes: Option<u32>,
    pub max_motion_secs: Option<u64>,
    /// Per-pass drop probability of the simulated sensor.
    pub sim_drop_probability: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            utc_offset_hours: 1,
            sensor_pin: 14,
            pwm_frequency_hz: DEFAULT_PWM_FREQUENCY_HZ,
            settle_delay_ms: 2_000,
            poll_period_secs: 60,
            http_addr: "0.0.0.0:8080".into(),
            containers: vec![
                ContainerConfig { pin: 5, times: vec!["7:0".into()] },
                ContainerConfig { pin: 4, times: vec!["7:0".into()] },
                ContainerConfig { pin: 12, times: vec![] },
                ContainerConfig { pin: 15, times: vec![] },
            ],
            profile: DEFAULT_STEPS
                .iter()
                .map(|&(duty, hold_ms)| StepConfig { duty, hold_ms })
                .collect(),
            max_passes: None,
            max_motion_secs: None,
            sim_drop_probability: 0.6,
        }
    }
}

impl Config {
    /// Loads from `DISPENSER_CONFIG` or `dispenser.json`, falling back to defaults
    /// when that file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !path.exists() {
            warn!("[Config] {:?} not found, using built-in defaults", path);
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(
            "[Config] loaded {:?}: {} containers, sensor pin {}",
            path,
            config.containers.len(),
            config.sensor_pin
        );
        Ok(config)
    }

    /// Startup checks; any failure is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.containers.is_empty() {
            return Err(ConfigError::NoContainers);
        }

        let mut pins = HashSet::new();
        for c in &self.containers {
            if !pins.insert(c.pin) {
                return Err(ConfigError::DuplicatePin { pin: c.pin });
            }
        }
        if pins.contains(&self.sensor_pin) {
            return Err(ConfigError::SensorPinConflict { pin: self.sensor_pin });
        }

        self.schedule()?;
        self.try_motion_profile()?;

        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ConfigError::UtcOffset(self.utc_offset_hours));
        }
        if self.settle_delay_ms == 0 {
            return Err(ConfigError::Zero { field: "settle_delay_ms" });
        }
        if self.poll_period_secs == 0 {
            return Err(ConfigError::Zero { field: "poll_period_secs" });
        }
        if self.pwm_frequency_hz == 0 {
            return Err(ConfigError::Zero { field: "pwm_frequency_hz" });
        }
        if self.max_passes == Some(0) {
            return Err(ConfigError::Zero { field: "max_passes" });
        }
        if self.max_motion_secs == Some(0) {
            return Err(ConfigError::Zero { field: "max_motion_secs" });
        }
        Ok(())
    }

    /// Parsed schedule: container slot (1-based) for every listed time.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        let mut schedule = Schedule::new();
        for (i, c) in self.containers.iter().enumerate() {
            let slot = i + 1;
            for t in &c.times {
                let time: TimeOfDay = t
                    .parse()
                    .map_err(|source| ConfigError::BadTime { slot, source })?;
                schedule.add(slot, time);
            }
        }
        Ok(schedule)
    }

    fn try_motion_profile(&self) -> Result<MotionProfile, ProfileError> {
        MotionProfile::new(
            self.profile
                .iter()
                .map(|s| MotionStep::from_millis(s.duty, s.hold_ms))
                .collect(),
        )
    }

    /// The configured profile; the built-in one if the configured steps are invalid.
    pub fn motion_profile(&self) -> MotionProfile {
        self.try_motion_profile().unwrap_or_default()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }

    pub fn retry_limit(&self) -> RetryLimit {
        RetryLimit {
            max_passes: self.max_passes,
            max_motion: self.max_motion_secs.map(Duration::from_secs),
        }
    }
}
