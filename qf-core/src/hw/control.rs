//! PWM and sensor file access
//!
//! Low-level read/write operations on hwmon attribute files.
//!
//! # PWM Values
//!
//! PWM values range from 0 to 255:
//! - 0 = fan stopped
//! - 255 = full speed
//!
//! # Temperature Values
//!
//! Linux hwmon reports temperatures in millidegrees Celsius; they are
//! converted to degrees here.

use std::fs;
use std::path::Path;

use qf_error::{QuietfanError, Result};

use crate::constants::{limits, pwm, temperature};

/// Write a PWM value (0-255)
pub fn set_pwm_value(pwm_path: &Path, value: u8) -> Result<()> {
    fs::write(pwm_path, value.to_string()).map_err(|e| QuietfanError::PwmWrite {
        path: pwm_path.to_path_buf(),
        reason: format!("Failed to write PWM value {}: {}", value, e),
    })
}

/// Enable manual PWM control mode
///
/// Writes "1" to the PWM enable file so the chip accepts software-controlled
/// PWM values instead of its own thermal control. A missing enable file
/// means the channel is always under manual control.
pub fn enable_manual_pwm(enable_path: &Path) -> Result<()> {
    if enable_path.exists() {
        fs::write(enable_path, pwm::enable::MANUAL.to_string()).map_err(|e| {
            QuietfanError::PwmWrite {
                path: enable_path.to_path_buf(),
                reason: format!("Failed to enable manual PWM control: {}", e),
            }
        })
    } else {
        Ok(())
    }
}

/// Read current fan speed in RPM
pub fn read_fan_rpm(fan_path: &Path) -> Result<u32> {
    let content = fs::read_to_string(fan_path).map_err(|e| QuietfanError::FanRead {
        path: fan_path.to_path_buf(),
        reason: format!("Failed to read: {}", e),
    })?;

    content
        .trim()
        .parse::<u32>()
        .map_err(|e| QuietfanError::FanRead {
            path: fan_path.to_path_buf(),
            reason: format!("Failed to parse '{}': {}", content.trim(), e),
        })
}

/// Read temperature sensor value in degrees Celsius
pub fn read_temperature(temp_path: &Path) -> Result<f32> {
    let content = fs::read_to_string(temp_path).map_err(|e| {
        QuietfanError::sensor_read(temp_path.display().to_string(), format!("Failed to read: {}", e))
    })?;

    let millidegrees = content.trim().parse::<i32>().map_err(|e| {
        QuietfanError::sensor_read(
            temp_path.display().to_string(),
            format!("Failed to parse '{}': {}", content.trim(), e),
        )
    })?;

    Ok(millidegrees as f32 / temperature::MILLIDEGREE_DIVISOR)
}

/// Read the chip's label for a `tempN_input` channel from `tempN_label`
///
/// `None` when the chip has no label for the channel, or the label is unusable
/// as a display name.
pub fn read_hwmon_label(temp_path: &Path) -> Option<String> {
    let channel = temp_path.file_name()?.to_str()?.strip_suffix("_input")?;
    let content = fs::read_to_string(temp_path.with_file_name(format!("{}_label", channel))).ok()?;
    let label = content.trim();
    if label.is_empty() || label.len() > limits::MAX_NAME_LENGTH || label.chars().any(char::is_control) {
        return None;
    }
    Some(label.to_string())
}

/// Read the 1-minute load average from a `/proc/loadavg` style file
pub fn read_load_average(loadavg_path: &Path) -> Result<f32> {
    let content = fs::read_to_string(loadavg_path).map_err(|e| QuietfanError::FileRead {
        path: loadavg_path.to_path_buf(),
        source: e,
    })?;

    content
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<f32>().ok())
        .ok_or_else(|| {
            QuietfanError::generic(format!(
                "Malformed load average in {}: '{}'",
                loadavg_path.display(),
                content.trim()
            ))
        })
}
