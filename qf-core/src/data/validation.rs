//! Configuration validation
//!
//! Checks everything that would otherwise fail at runtime: value ranges,
//! duplicate names and the paths the daemon writes to as root.
//!
//! # Security Considerations
//!
//! - **Path Restriction**: PWM, fan and temperature paths must live under
//!   `/sys/class/hwmon` or `/sys/devices`, disk sensors under `/dev`
//! - **Size Limits**: the configuration file size is capped before reading
//! - **Command Arguments**: device paths handed to `smartctl`/`hdparm` are
//!   restricted to a safe character set

use std::collections::HashSet;
use std::path::Path;

use qf_error::{QuietfanError, Result};

use super::config::{seconds, Config, FanConfig, SensorConfig, SensorType};
use crate::constants::limits;
use crate::history::History;

/// Validate a whole configuration document
pub fn validate_config(config: &Config) -> Result<()> {
    let update = seconds("update_time", config.update_time)?;
    if update.is_zero() {
        return Err(QuietfanError::invalid_config("update_time", "must be positive"));
    }
    seconds("min_rpm_probe_interval", config.min_rpm_probe_interval)?;
    let storage = seconds("history.storage_time", config.history.storage_time)?;
    if History::entries_for(storage, update) > limits::MAX_HISTORY_ENTRIES {
        return Err(QuietfanError::invalid_config(
            "history.storage_time",
            format!(
                "keeps more than {} snapshots at update_time {}",
                limits::MAX_HISTORY_ENTRIES,
                config.update_time
            ),
        ));
    }

    if config.fans.is_empty() {
        return Err(QuietfanError::MissingConfig("fans".to_string()));
    }
    if config.fans.len() > limits::MAX_FANS {
        return Err(QuietfanError::invalid_config(
            "fans",
            format!("at most {} fans are supported", limits::MAX_FANS),
        ));
    }

    validate_unique("fan", config.fans.iter().map(FanConfig::display_name))?;

    for fan in &config.fans {
        validate_fan(fan)?;
    }
    Ok(())
}

/// Validate one fan entry and its sensors
pub fn validate_fan(fan: &FanConfig) -> Result<()> {
    let name = fan.display_name();
    validate_name(&name)?;
    let field = |f: &str| format!("fans[{}].{}", name, f);

    validate_pwm_path(&fan.pwm_path)?;
    validate_fan_path(&fan.rpm_path)?;

    if fan.min_pwm == 0 {
        return Err(QuietfanError::invalid_config(field("min_pwm"), "must be at least 1"));
    }
    if fan.min_pwm_step == 0 {
        return Err(QuietfanError::invalid_config(field("min_pwm_step"), "must be at least 1"));
    }

    seconds(&field("spinup_time"), fan.spinup_time)?;
    let min_settle = seconds(&field("min_settle_time"), fan.min_settle_time)?;
    let max_settle = seconds(&field("max_settle_time"), fan.max_settle_time)?;
    if min_settle > max_settle {
        return Err(QuietfanError::invalid_config(
            field("min_settle_time"),
            format!(
                "{} is greater than max_settle_time {}",
                fan.min_settle_time, fan.max_settle_time
            ),
        ));
    }
    let reset = seconds(&field("settle_time_reset_interval"), fan.settle_time_reset_interval)?;
    if reset.is_zero() {
        return Err(QuietfanError::invalid_config(
            field("settle_time_reset_interval"),
            "must be positive",
        ));
    }
    if let Some(interval) = fan.min_rpm_probe_interval {
        seconds(&field("min_rpm_probe_interval"), interval)?;
    }
    if fan.fan_max_rpm_sanity_check == Some(0) {
        return Err(QuietfanError::invalid_config(
            field("fan_max_rpm_sanity_check"),
            "must be positive",
        ));
    }

    let pid = &fan.pid;
    for (gain, value) in [("kp", pid.kp), ("ki", pid.ki), ("kd", pid.kd)] {
        if !value.is_finite() || value < 0.0 {
            return Err(QuietfanError::invalid_config(
                field(&format!("pid.{}", gain)),
                format!("{} must be a non-negative number", value),
            ));
        }
    }
    if !pid.derivative_smoothing.is_finite() || pid.derivative_smoothing < 0.0 {
        return Err(QuietfanError::invalid_config(
            field("pid.derivative_smoothing"),
            "must be a non-negative number of seconds",
        ));
    }
    if !pid.max_output.is_finite() || pid.max_output < 0.0 {
        return Err(QuietfanError::invalid_config(field("pid.max_output"), "must be non-negative"));
    }

    if fan.sensors.is_empty() {
        return Err(QuietfanError::MissingConfig(field("sensors")));
    }
    if fan.sensors.len() > limits::MAX_SENSORS_PER_FAN {
        return Err(QuietfanError::invalid_config(
            field("sensors"),
            format!("at most {} sensors per fan", limits::MAX_SENSORS_PER_FAN),
        ));
    }
    validate_unique("sensor", fan.sensors.iter().map(SensorConfig::identity))?;

    for sensor in &fan.sensors {
        validate_sensor(sensor)?;
    }
    Ok(())
}

/// Validate one sensor entry
pub fn validate_sensor(sensor: &SensorConfig) -> Result<()> {
    let name = sensor.display_name();
    validate_name(&name)?;

    match sensor.sensor_type {
        SensorType::Hwmon => validate_temp_path(&sensor.path)?,
        SensorType::Harddrive => validate_device_path(&sensor.path)?,
    }

    if !sensor.target_temperature.is_finite() {
        return Err(QuietfanError::invalid_config(
            format!("sensor {}: target_temperature", name),
            "must be a number",
        ));
    }
    if !sensor.temperature_scale.is_finite() || sensor.temperature_scale <= 0.0 {
        return Err(QuietfanError::invalid_config(
            format!("sensor {}: temperature_scale", name),
            format!("{} must be positive", sensor.temperature_scale),
        ));
    }
    if let Some(critical) = sensor.critical_temperature {
        if !critical.is_finite() || critical <= sensor.target_temperature {
            return Err(QuietfanError::invalid_config(
                format!("sensor {}: critical_temperature", name),
                format!(
                    "{} must be above the target temperature {}",
                    critical, sensor.target_temperature
                ),
            ));
        }
    }
    Ok(())
}

/// Reject repeated names, reporting each duplicate once
pub fn validate_unique(kind: &'static str, names: impl Iterator<Item = String>) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = names.filter(|n| !seen.insert(n.clone())).collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort();
    duplicates.dedup();
    Err(QuietfanError::DuplicateName {
        kind,
        names: duplicates,
    })
}

/// Validates a fan or sensor name
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(QuietfanError::config("name cannot be empty"));
    }
    if name.len() > limits::MAX_NAME_LENGTH {
        return Err(QuietfanError::config(format!(
            "name '{}...' exceeds maximum length of {} characters",
            &name[..name.char_indices().nth(16).map_or(name.len(), |(i, _)| i)],
            limits::MAX_NAME_LENGTH
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(QuietfanError::config(format!("name {:?} contains control characters", name)));
    }
    Ok(())
}

/// Validates a PWM control path (`pwmN`)
pub fn validate_pwm_path(path: &Path) -> Result<()> {
    qf_protocol::validate_pwm_target_path(&path.to_string_lossy())
        .map_err(|reason| QuietfanError::invalid_path(path, reason))
}

/// Validates a fan tachometer path (`fanN_input`)
pub fn validate_fan_path(path: &Path) -> Result<()> {
    validate_hwmon_file(path, "fan", "fan speed input")
}

/// Validates a temperature input path (`tempN_input`)
pub fn validate_temp_path(path: &Path) -> Result<()> {
    validate_hwmon_file(path, "temp", "temperature input")
}

/// Validates a block device path for disk sensors
pub fn validate_device_path(path: &Path) -> Result<()> {
    qf_protocol::validate_block_device_path(&path.to_string_lossy())
        .map_err(|reason| QuietfanError::invalid_path(path, reason))
}

fn validate_hwmon_file(path: &Path, prefix: &str, what: &str) -> Result<()> {
    let path_str = path.to_string_lossy();
    qf_protocol::validate_hwmon_path(&path_str)
        .map_err(|reason| QuietfanError::invalid_path(path, reason))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| QuietfanError::invalid_path(path, "invalid filename"))?;
    if !filename.starts_with(prefix) || !filename.ends_with("_input") {
        return Err(QuietfanError::invalid_path(path, format!("not a {} file", what)));
    }
    Ok(())
}

/// Validates configuration file size
pub fn validate_file_size(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| QuietfanError::config(format!("cannot read file metadata: {}", e)))?;

    if metadata.len() > limits::MAX_CONFIG_SIZE {
        return Err(QuietfanError::config(format!(
            "configuration file exceeds maximum size of {} bytes",
            limits::MAX_CONFIG_SIZE
        )));
    }
    Ok(())
}
