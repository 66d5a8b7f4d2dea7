// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Thresholds, sensor and PWM output settings are read from TOML. Missing
//! keys fall back to their defaults.
//! Default path: `/etc/pwmfan/config.toml`

use crate::curve::{Percent, Thresholds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pwmfan/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/pwmfan.sock";

/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default PWM frequency; 25 kHz is the 4-pin fan standard.
pub const DEFAULT_FREQUENCY_HZ: u32 = 25_000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Fan on/off and full-speed temperatures.
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Where temperature readings come from.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Which PWM output drives the fan.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Poll interval for the control loop, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Path for the Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Speed the fan is left at when the daemon exits, including after a
    /// sensor or output failure.
    #[serde(default = "default_exit_speed")]
    pub exit_speed_percent: Percent,

    /// Release the PWM output on exit after setting the exit speed.
    /// For hwmon outputs this hands the fan back to automatic control.
    #[serde(default)]
    pub restore_on_exit: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            exit_speed_percent: 100,
            restore_on_exit: false,
        }
    }
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Temperature sensor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    /// Index of `/sys/class/thermal/thermal_zoneN`.
    #[serde(default)]
    pub thermal_zone: u32,
}

/// PWM output selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum OutputConfig {
    /// Kernel PWM class channel, e.g. `/sys/class/pwm/pwmchip0/pwm0`.
    #[serde(rename = "pwmchip")]
    PwmChip {
        #[serde(default)]
        chip: u32,
        #[serde(default)]
        channel: u32,
        #[serde(default = "default_frequency")]
        frequency_hz: u32,
    },

    /// An hwmon `pwmN` file (0-255 duty).
    #[serde(rename = "hwmon")]
    Hwmon {
        /// Absolute path to the `pwmN` file
        path: PathBuf,
    },
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig::PwmChip {
            chip: 0,
            channel: 0,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A configuration value that breaks one of the threshold invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be >= 0, got {value}")]
    NegativeTemperature { name: &'static str, value: f64 },
    #[error("{name} must be a finite number")]
    NonFiniteTemperature { name: &'static str },
    #[error("start_temp_c ({start}) must be >= stop_temp_c ({stop})")]
    StartBelowStop { start: f64, stop: f64 },
    #[error("start_temp_c ({start}) must be <= max_temp_c ({max})")]
    StartAboveMax { start: f64, max: f64 },
    #[error("stop_temp_c ({stop}) must be < max_temp_c ({max})")]
    EmptySpeedRange { stop: f64, max: f64 },
    #[error("{name} must be between 0 and 100, got {value}")]
    PercentOutOfRange { name: &'static str, value: Percent },
    #[error("poll_interval_ms must be > 0")]
    ZeroPollInterval,
    #[error("frequency_hz must be between 1 and 1000000000, got {0}")]
    FrequencyOutOfRange(u32),
}

/// Check the invariants the speed decision relies on.
pub fn validate_thresholds(t: &Thresholds) -> Result<(), ConfigError> {
    for (name, value) in [
        ("start_temp_c", t.start_temp_c),
        ("stop_temp_c", t.stop_temp_c),
        ("max_temp_c", t.max_temp_c),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::NonFiniteTemperature { name });
        }
        if value < 0.0 {
            return Err(ConfigError::NegativeTemperature { name, value });
        }
    }

    if t.start_temp_c < t.stop_temp_c {
        return Err(ConfigError::StartBelowStop {
            start: t.start_temp_c,
            stop: t.stop_temp_c,
        });
    }
    if t.start_temp_c > t.max_temp_c {
        return Err(ConfigError::StartAboveMax {
            start: t.start_temp_c,
            max: t.max_temp_c,
        });
    }
    if t.stop_temp_c >= t.max_temp_c {
        return Err(ConfigError::EmptySpeedRange {
            stop: t.stop_temp_c,
            max: t.max_temp_c,
        });
    }
    if t.min_speed_percent > 100 {
        return Err(ConfigError::PercentOutOfRange {
            name: "min_speed_percent",
            value: t.min_speed_percent,
        });
    }
    Ok(())
}

impl Config {
    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_thresholds(&self.thresholds)?;

        if self.daemon.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.daemon.exit_speed_percent > 100 {
            return Err(ConfigError::PercentOutOfRange {
                name: "exit_speed_percent",
                value: self.daemon.exit_speed_percent,
            });
        }
        if let OutputConfig::PwmChip { frequency_hz, .. } = self.output {
            if frequency_hz == 0 || frequency_hz > 1_000_000_000 {
                return Err(ConfigError::FrequencyOutOfRange(frequency_hz));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.thresholds;
        writeln!(f, "Config")?;
        match &self.output {
            OutputConfig::PwmChip {
                chip,
                channel,
                frequency_hz,
            } => {
                writeln!(f, "\tOutput:            pwmchip{chip}/pwm{channel}")?;
                writeln!(f, "\tControl Frequency: {frequency_hz} Hz")?;
            }
            OutputConfig::Hwmon { path } => {
                writeln!(f, "\tOutput:            {}", path.display())?;
            }
        }
        writeln!(f, "\tThermal Zone:      {}", self.sensor.thermal_zone)?;
        writeln!(f, "\tMinimum Fan Speed: {}%", t.min_speed_percent)?;
        writeln!(f, "\tStart Temp:        {} °C", t.start_temp_c)?;
        writeln!(f, "\tStop Temp:         {} °C", t.stop_temp_c)?;
        writeln!(f, "\tMax Temp:          {} °C", t.max_temp_c)?;
        write!(f, "\tPolling Rate:      {} ms", self.daemon.poll_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_exit_speed() -> Percent {
    100
}

fn default_frequency() -> u32 {
    DEFAULT_FREQUENCY_HZ
}
