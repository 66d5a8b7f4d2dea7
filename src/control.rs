// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! One control-loop tick: sample, decide, actuate.
//!
//! [`Controller`] owns the last commanded speed and is the only place it
//! changes. Hardware sits behind [`TemperatureSource`] and [`FanActuator`].

use crate::curve::{self, Percent, SpeedCommand, Thresholds};
use std::io;

/// Something that reports a temperature in degrees Celsius.
pub trait TemperatureSource: Send {
    fn read_celsius(&mut self) -> io::Result<f64>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// A PWM output driving the fan.
///
/// Implementations clamp percentages above 100 before touching hardware.
pub trait FanActuator: Send {
    /// Prepare the output for [`FanActuator::set_speed`] calls.
    fn enable(&mut self) -> io::Result<()>;

    fn set_speed(&mut self, percent: Percent) -> io::Result<()>;

    /// Release the output.
    fn disable(&mut self) -> io::Result<()>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// Fan state threaded between ticks.
#[derive(Debug, Clone)]
pub struct Controller {
    thresholds: Thresholds,
    speed: Percent,
    last_temp_c: Option<f64>,
}

impl Controller {
    /// A controller for an idle fan.
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            speed: 0,
            last_temp_c: None,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Replace the thresholds. Callers validate first.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    /// Last commanded speed.
    pub fn speed(&self) -> Percent {
        self.speed
    }

    pub fn is_running(&self) -> bool {
        self.speed > 0
    }

    pub fn last_temp_c(&self) -> Option<f64> {
        self.last_temp_c
    }

    /// Run one tick and return the decision that was applied. On error the
    /// stored speed is left untouched.
    pub fn tick(
        &mut self,
        source: &mut dyn TemperatureSource,
        output: &mut dyn FanActuator,
    ) -> io::Result<SpeedCommand> {
        let temp_c = source.read_celsius()?;
        let command = curve::decide(&self.thresholds, temp_c, self.speed);

        match command {
            SpeedCommand::Set(percent) => {
                output.set_speed(percent)?;
                if percent > 0 && self.speed == 0 {
                    log::info!("Fan on at {temp_c}°C ({percent}%)");
                } else if percent == 0 && self.speed > 0 {
                    log::info!("Fan off at {temp_c}°C");
                }
                self.speed = percent;
            }
            SpeedCommand::Keep => {
                log::warn!(
                    "Ignoring reading {temp_c} from {}, fan stays at {}%",
                    source.describe(),
                    self.speed
                );
            }
        }

        self.last_temp_c = Some(temp_c);
        log::debug!("CPU Temp: {temp_c}°C\tFan Speed: {}%", self.speed);

        Ok(command)
    }

    /// Drive the fan to a fixed speed, bypassing the thresholds.
    pub fn force(&mut self, output: &mut dyn FanActuator, percent: Percent) -> io::Result<()> {
        output.set_speed(percent)?;
        self.speed = percent.min(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedSensor {
        readings: VecDeque<io::Result<f64>>,
    }

    impl ScriptedSensor {
        fn new(temps: &[f64]) -> Self {
            Self {
                readings: temps.iter().map(|&t| Ok(t)).collect(),
            }
        }
    }

    impl TemperatureSource for ScriptedSensor {
        fn read_celsius(&mut self) -> io::Result<f64> {
            self.readings
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more readings")))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingFan {
        writes: Vec<Percent>,
        fail: bool,
    }

    impl FanActuator for RecordingFan {
        fn enable(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn set_speed(&mut self, percent: Percent) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.writes.push(percent.min(100));
            Ok(())
        }

        fn disable(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    #[test]
    fn test_temperature_sequence_drives_fan() {
        let mut sensor = ScriptedSensor::new(&[30.0, 41.0, 36.0, 34.0, 60.0]);
        let mut fan = RecordingFan::default();
        let mut ctl = Controller::new(Thresholds::default());

        let speeds: Vec<Percent> = (0..5)
            .map(|_| {
                ctl.tick(&mut sensor, &mut fan).unwrap();
                ctl.speed()
            })
            .collect();

        assert_eq!(speeds, vec![0, 30, 30, 0, 100]);
        assert_eq!(fan.writes, vec![0, 30, 30, 0, 100]);
        assert_eq!(ctl.last_temp_c(), Some(60.0));
        assert!(ctl.is_running());
    }

    #[test]
    fn test_keep_leaves_fan_alone() {
        let mut sensor = ScriptedSensor::new(&[45.0, f64::NAN]);
        let mut fan = RecordingFan::default();
        let mut ctl = Controller::new(Thresholds::default());

        assert_eq!(ctl.tick(&mut sensor, &mut fan).unwrap(), SpeedCommand::Set(50));
        assert_eq!(ctl.tick(&mut sensor, &mut fan).unwrap(), SpeedCommand::Keep);
        assert_eq!(ctl.speed(), 50);
        assert_eq!(fan.writes, vec![50]);
    }

    #[test]
    fn test_sensor_error_keeps_state() {
        let mut sensor = ScriptedSensor::new(&[45.0]);
        let mut fan = RecordingFan::default();
        let mut ctl = Controller::new(Thresholds::default());

        ctl.tick(&mut sensor, &mut fan).unwrap();
        let err = ctl.tick(&mut sensor, &mut fan).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(ctl.speed(), 50);
        assert_eq!(fan.writes, vec![50]);
    }

    #[test]
    fn test_output_error_keeps_state() {
        let mut sensor = ScriptedSensor::new(&[45.0]);
        let mut fan = RecordingFan {
            fail: true,
            ..Default::default()
        };
        let mut ctl = Controller::new(Thresholds::default());

        assert!(ctl.tick(&mut sensor, &mut fan).is_err());
        assert_eq!(ctl.speed(), 0);
        assert_eq!(ctl.last_temp_c(), None);
    }

    #[test]
    fn test_new_thresholds_apply_next_tick() {
        let mut sensor = ScriptedSensor::new(&[45.0, 45.0]);
        let mut fan = RecordingFan::default();
        let mut ctl = Controller::new(Thresholds::default());

        assert_eq!(ctl.tick(&mut sensor, &mut fan).unwrap(), SpeedCommand::Set(50));

        ctl.set_thresholds(Thresholds {
            start_temp_c: 50.0,
            stop_temp_c: 46.0,
            max_temp_c: 70.0,
            min_speed_percent: 20,
        });
        assert_eq!(ctl.tick(&mut sensor, &mut fan).unwrap(), SpeedCommand::Set(0));
    }

    #[test]
    fn test_force() {
        let mut fan = RecordingFan::default();
        let mut ctl = Controller::new(Thresholds::default());

        ctl.force(&mut fan, 100).unwrap();
        assert_eq!(ctl.speed(), 100);
        assert_eq!(fan.writes, vec![100]);
    }
}
