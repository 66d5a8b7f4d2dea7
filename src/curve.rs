// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan speed decision with a hysteresis band.
//!
//! The fan turns on once the temperature reaches `start_temp_c` and only
//! turns off again after it falls to `stop_temp_c`. While running, the speed
//! is linearly interpolated across `stop_temp_c..max_temp_c` and raised to
//! the configured minimum speed.

use serde::{Deserialize, Serialize};

/// Fan duty cycle as a whole percentage (0-100).
pub type Percent = u8;

/// Temperature thresholds and the minimum running speed.
///
/// Expected to satisfy `0 <= stop <= start <= max`, `stop < max` and
/// `min_speed_percent <= 100`; see [`crate::config::validate_thresholds`].
/// Fields missing from a config file take their [`Default`] values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Temperature (°C) at which an idle fan starts.
    pub start_temp_c: f64,
    /// Temperature (°C) at or below which a running fan stops.
    pub stop_temp_c: f64,
    /// Temperature (°C) at which the fan reaches full speed.
    pub max_temp_c: f64,
    /// Lowest speed a running fan is driven at.
    pub min_speed_percent: Percent,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            start_temp_c: 40.0,
            stop_temp_c: 35.0,
            max_temp_c: 55.0,
            min_speed_percent: 30,
        }
    }
}

/// Result of a speed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedCommand {
    /// Drive the fan at this percentage.
    Set(Percent),
    /// Leave the fan at its current speed.
    Keep,
}

impl SpeedCommand {
    /// The speed the fan ends up at, given the speed it is at now.
    pub fn resolve(self, current: Percent) -> Percent {
        match self {
            SpeedCommand::Set(p) => p,
            SpeedCommand::Keep => current,
        }
    }
}

/// Position of `value` within `low..high` as a percentage.
///
/// - At or below `low`: 0
/// - Above `high`: 100
/// - Between: truncated linear interpolation, capped at 100
///
/// A zero-width (or inverted) range behaves as a step at `high`.
pub fn percent_of_range(low: f64, high: f64, value: f64) -> Percent {
    if high <= low {
        return if value >= high { 100 } else { 0 };
    }
    if value > high {
        return 100;
    }
    if value <= low {
        return 0;
    }

    let percent = ((value - low) / (high - low) * 100.0).floor();
    percent.clamp(0.0, 100.0) as Percent
}

/// Decide the next fan speed.
///
/// `current_speed > 0` means the fan is running. Readings that are not
/// finite yield [`SpeedCommand::Keep`].
pub fn decide(thresholds: &Thresholds, current_temp_c: f64, current_speed: Percent) -> SpeedCommand {
    if !current_temp_c.is_finite() {
        return SpeedCommand::Keep;
    }

    let proportional =
        || percent_of_range(thresholds.stop_temp_c, thresholds.max_temp_c, current_temp_c);

    let candidate = if current_temp_c >= thresholds.max_temp_c {
        proportional()
    } else if current_speed > 0 {
        if current_temp_c > thresholds.stop_temp_c {
            proportional()
        } else {
            0
        }
    } else if current_temp_c >= thresholds.start_temp_c {
        proportional()
    } else {
        0
    };

    apply_min_speed(SpeedCommand::Set(candidate), thresholds.min_speed_percent)
}

/// Raise a non-zero speed to at least `min_speed`. Zero (fan off) and
/// [`SpeedCommand::Keep`] pass through.
pub fn apply_min_speed(command: SpeedCommand, min_speed: Percent) -> SpeedCommand {
    match command {
        SpeedCommand::Set(0) | SpeedCommand::Keep => command,
        SpeedCommand::Set(p) => SpeedCommand::Set(p.max(min_speed)),
    }
}
