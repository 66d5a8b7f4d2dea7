// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! sysfs temperature input and PWM output.
//!
//! Reads CPU temperature from `/sys/class/thermal/thermal_zoneN/temp` and
//! drives the fan through either the kernel PWM class
//! (`/sys/class/pwm/pwmchipN/pwmM`) or an hwmon `pwmN` file.

use crate::config::OutputConfig;
use crate::control::{FanActuator, TemperatureSource};
use crate::curve::Percent;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const THERMAL_ROOT: &str = "/sys/class/thermal";
const PWM_ROOT: &str = "/sys/class/pwm";

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// How long to wait for udev to hand over a freshly exported channel.
const EXPORT_ATTEMPTS: u32 = 20;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Temperature input
// ---------------------------------------------------------------------------

/// A thermal zone reporting millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    /// Absolute path to the zone's `temp` file
    pub input_path: PathBuf,
}

impl ThermalZone {
    /// `/sys/class/thermal/thermal_zone{zone}/temp`
    pub fn new(zone: u32) -> Self {
        Self::from_path(Path::new(THERMAL_ROOT).join(format!("thermal_zone{zone}/temp")))
    }

    pub fn from_path(input_path: PathBuf) -> Self {
        Self { input_path }
    }
}

impl TemperatureSource for ThermalZone {
    fn read_celsius(&mut self) -> io::Result<f64> {
        let raw = fs::read_to_string(&self.input_path)?;
        let millic = raw.trim().parse::<i64>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Bad reading {:?} in {}: {e}", raw.trim(), self.input_path.display()),
            )
        })?;
        Ok(millic as f64 / 1000.0)
    }

    fn describe(&self) -> String {
        self.input_path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// PWM class output
// ---------------------------------------------------------------------------

/// A channel of a kernel PWM controller.
#[derive(Debug, Clone)]
pub struct PwmChip {
    chip_dir: PathBuf,
    channel: u32,
    period_ns: u64,
}

impl PwmChip {
    /// `/sys/class/pwm/pwmchip{chip}/pwm{channel}` at `frequency_hz`.
    pub fn new(chip: u32, channel: u32, frequency_hz: u32) -> Self {
        Self::with_root(Path::new(PWM_ROOT), chip, channel, frequency_hz)
    }

    pub fn with_root(root: &Path, chip: u32, channel: u32, frequency_hz: u32) -> Self {
        Self {
            chip_dir: root.join(format!("pwmchip{chip}")),
            channel,
            period_ns: NANOS_PER_SEC / u64::from(frequency_hz.max(1)),
        }
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip_dir.join(format!("pwm{}", self.channel))
    }

    /// Duty cycle in nanoseconds for a percentage of the period.
    pub fn duty_ns(&self, percent: Percent) -> u64 {
        self.period_ns * u64::from(clamp_percent(percent)) / 100
    }
}

impl FanActuator for PwmChip {
    /// Export the channel if needed, then set the period and start output.
    ///
    /// Attribute files of a just-exported channel may not be writable until
    /// udev has applied its rules, so the first write is retried briefly.
    /// Without such a rule the daemon has to run as root.
    fn enable(&mut self) -> io::Result<()> {
        let dir = self.channel_dir();
        let period = format!("{}", self.period_ns);

        if dir.exists() {
            // The kernel rejects a period shorter than the current duty cycle
            let duty_path = dir.join("duty_cycle");
            if duty_path.exists() {
                fs::write(&duty_path, "0")?;
            }
            fs::write(dir.join("period"), &period)?;
        } else {
            fs::write(self.chip_dir.join("export"), format!("{}", self.channel))?;
            write_with_retry(&dir.join("period"), &period, EXPORT_ATTEMPTS, EXPORT_RETRY_DELAY)?;
        }

        fs::write(dir.join("enable"), "1")
    }

    fn set_speed(&mut self, percent: Percent) -> io::Result<()> {
        fs::write(
            self.channel_dir().join("duty_cycle"),
            format!("{}", self.duty_ns(percent)),
        )
    }

    fn disable(&mut self) -> io::Result<()> {
        fs::write(self.channel_dir().join("enable"), "0")
    }

    fn describe(&self) -> String {
        self.channel_dir().display().to_string()
    }
}

// ---------------------------------------------------------------------------
// hwmon output
// ---------------------------------------------------------------------------

/// An hwmon `pwmN` file taking a 0-255 duty value.
#[derive(Debug, Clone)]
pub struct HwmonPwm {
    pwm_path: PathBuf,
    pwm_enable_path: PathBuf,
}

impl HwmonPwm {
    pub fn new(pwm_path: PathBuf) -> Self {
        let mut enable = pwm_path.clone().into_os_string();
        enable.push("_enable");
        Self {
            pwm_path,
            pwm_enable_path: PathBuf::from(enable),
        }
    }

    /// Scale a percentage onto the 0-255 hwmon range.
    pub fn pwm_value(percent: Percent) -> u8 {
        (u16::from(clamp_percent(percent)) * 255 / 100) as u8
    }
}

impl FanActuator for HwmonPwm {
    /// Switch to manual mode (`pwmN_enable = 1`).
    fn enable(&mut self) -> io::Result<()> {
        fs::write(&self.pwm_enable_path, "1")
    }

    fn set_speed(&mut self, percent: Percent) -> io::Result<()> {
        fs::write(&self.pwm_path, format!("{}", Self::pwm_value(percent)))
    }

    /// Hand the fan back to automatic (BIOS/firmware) control.
    fn disable(&mut self) -> io::Result<()> {
        fs::write(&self.pwm_enable_path, "2")
    }

    fn describe(&self) -> String {
        self.pwm_path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the output described by the config.
pub fn open_output(output: &OutputConfig) -> Box<dyn FanActuator> {
    match output {
        OutputConfig::PwmChip {
            chip,
            channel,
            frequency_hz,
        } => Box::new(PwmChip::new(*chip, *channel, *frequency_hz)),
        OutputConfig::Hwmon { path } => Box::new(HwmonPwm::new(path.clone())),
    }
}

/// Write `value`, retrying while the file is missing or not yet writable.
fn write_with_retry(path: &Path, value: &str, attempts: u32, delay: Duration) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        match fs::write(path, value) {
            Err(e)
                if attempt < attempts
                    && matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                    ) =>
            {
                log::debug!("{} not ready ({e}), retrying", path.display());
                attempt += 1;
                thread::sleep(delay);
            }
            result => return result,
        }
    }
}

/// Cap a duty percentage at 100 before it reaches hardware.
pub fn clamp_percent(percent: Percent) -> Percent {
    percent.min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pwmfan-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_thermal_zone_millidegrees() {
        let dir = scratch_dir("thermal");
        let path = dir.join("temp");
        fs::write(&path, "48312\n").unwrap();

        let mut zone = ThermalZone::from_path(path);
        assert_eq!(zone.read_celsius().unwrap(), 48.312);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_thermal_zone_garbage_is_invalid_data() {
        let dir = scratch_dir("thermal-bad");
        let path = dir.join("temp");
        fs::write(&path, "n/a\n").unwrap();

        let err = ThermalZone::from_path(path).read_celsius().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_thermal_zone_missing_file() {
        let mut zone = ThermalZone::from_path(PathBuf::from("/nonexistent/thermal/temp"));
        assert_eq!(zone.read_celsius().unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(0), 0);
        assert_eq!(clamp_percent(100), 100);
        assert_eq!(clamp_percent(255), 100);
    }

    #[test]
    fn test_pwmchip_enable_and_duty() {
        let root = scratch_dir("pwmchip");
        let channel = root.join("pwmchip0").join("pwm0");
        fs::create_dir_all(&channel).unwrap();
        fs::write(channel.join("duty_cycle"), "123456").unwrap();

        let mut pwm = PwmChip::with_root(&root, 0, 0, 25_000);

        pwm.enable().unwrap();
        assert_eq!(read(&channel.join("period")), "40000");
        assert_eq!(read(&channel.join("enable")), "1");
        assert_eq!(read(&channel.join("duty_cycle")), "0");

        pwm.set_speed(30).unwrap();
        assert_eq!(read(&channel.join("duty_cycle")), "12000");

        pwm.set_speed(200).unwrap();
        assert_eq!(read(&channel.join("duty_cycle")), "40000");

        pwm.disable().unwrap();
        assert_eq!(read(&channel.join("enable")), "0");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_pwmchip_exports_missing_channel() {
        let root = scratch_dir("pwmchip-export");
        fs::create_dir_all(root.join("pwmchip1")).unwrap();

        let mut pwm = PwmChip::with_root(&root, 1, 2, 25_000);
        // The kernel creates pwm2/ on export; a plain directory does not
        assert!(pwm.enable().is_err());
        assert_eq!(read(&root.join("pwmchip1").join("export")), "2");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_retry_waits_for_channel() {
        let root = scratch_dir("pwmchip-retry");
        let channel = root.join("pwm0");
        let period = channel.join("period");

        let creator = {
            let channel = channel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                fs::create_dir_all(&channel).unwrap();
            })
        };

        write_with_retry(&period, "40000", 200, Duration::from_millis(5)).unwrap();
        creator.join().unwrap();
        assert_eq!(read(&period), "40000");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_retry_gives_up() {
        let path = Path::new("/nonexistent/pwmchip0/pwm0/period");
        let err = write_with_retry(path, "40000", 3, Duration::from_millis(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_hwmon_scaling() {
        assert_eq!(HwmonPwm::pwm_value(0), 0);
        assert_eq!(HwmonPwm::pwm_value(30), 76);
        assert_eq!(HwmonPwm::pwm_value(100), 255);
        assert_eq!(HwmonPwm::pwm_value(150), 255);
    }

    #[test]
    fn test_hwmon_writes() {
        let dir = scratch_dir("hwmon");
        let pwm_path = dir.join("pwm1");

        let mut pwm = HwmonPwm::new(pwm_path.clone());
        pwm.enable().unwrap();
        assert_eq!(read(&dir.join("pwm1_enable")), "1");

        pwm.set_speed(50).unwrap();
        assert_eq!(read(&pwm_path), "127");

        pwm.disable().unwrap();
        assert_eq!(read(&dir.join("pwm1_enable")), "2");

        fs::remove_dir_all(&dir).ok();
    }
}
