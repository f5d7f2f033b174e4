//! Fan hardware capability and the hwmon implementation

use std::path::{Path, PathBuf};

use qf_error::Result;
use tracing::debug;

use super::control;

/// A controllable fan: one PWM output and one tachometer input
pub trait FanHardware: Send {
    /// Human readable identification for logs
    fn describe(&self) -> String;

    fn read_rpm(&mut self) -> Result<u32>;

    fn write_pwm(&mut self, value: u8) -> Result<()>;

    /// Take the PWM channel out of automatic mode
    fn enable_manual(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fan driven through hwmon `pwmN` and read through `fanN_input`
#[derive(Debug, Clone)]
pub struct HwmonFan {
    pwm_path: PathBuf,
    rpm_path: PathBuf,
}

impl HwmonFan {
    pub fn new(pwm_path: impl Into<PathBuf>, rpm_path: impl Into<PathBuf>) -> Self {
        Self {
            pwm_path: pwm_path.into(),
            rpm_path: rpm_path.into(),
        }
    }

    pub fn pwm_path(&self) -> &Path {
        &self.pwm_path
    }

    /// `pwmN_enable` next to `pwmN`
    pub fn enable_path(&self) -> PathBuf {
        let mut name = self.pwm_path.as_os_str().to_os_string();
        name.push("_enable");
        PathBuf::from(name)
    }
}

impl FanHardware for HwmonFan {
    fn describe(&self) -> String {
        format!("hwmon:{}", self.pwm_path.display())
    }

    fn read_rpm(&mut self) -> Result<u32> {
        control::read_fan_rpm(&self.rpm_path)
    }

    fn write_pwm(&mut self, value: u8) -> Result<()> {
        control::set_pwm_value(&self.pwm_path, value)
    }

    fn enable_manual(&mut self) -> Result<()> {
        let enable_path = self.enable_path();
        debug!(path = %enable_path.display(), "Enabling manual PWM control");
        control::enable_manual_pwm(&enable_path)
    }
}
