//! Configuration file handling
//!
//! The configuration is a single JSON document. Every field except the fan
//! PWM/RPM paths, the sensor paths and target temperatures has a default
//! taken from [`crate::constants`]. All durations are in seconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use qf_error::{QuietfanError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::validation;
use crate::constants::{fan, server, temperature, timing};
use crate::engine::{FanEngine, FanRegistry, FanSettings, PidGains};
use crate::history::History;
use crate::hw::{read_hwmon_label, Harddrive, HwmonFan, HwmonThermometer, Sensor, TemperatureLimits};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control loop period
    #[serde(default = "default_update_time")]
    pub update_time: f64,
    #[serde(default)]
    pub log_level: Option<String>,
    /// Default for fans that do not set their own
    #[serde(default = "default_min_rpm_probe_interval")]
    pub min_rpm_probe_interval: f64,
    #[serde(default)]
    pub status_server: StatusServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    pub fans: Vec<FanConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for StatusServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_storage_time")]
    pub storage_time: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            storage_time: default_storage_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanConfig {
    /// Defaults to the PWM path
    #[serde(default)]
    pub name: Option<String>,
    pub pwm_path: PathBuf,
    pub rpm_path: PathBuf,
    #[serde(default = "default_min_pwm")]
    pub min_pwm: u8,
    #[serde(default = "default_spinup_pwm")]
    pub spinup_pwm: u8,
    #[serde(default = "default_spinup_time")]
    pub spinup_time: f64,
    #[serde(default = "default_min_settle_time")]
    pub min_settle_time: f64,
    #[serde(default = "default_max_settle_time")]
    pub max_settle_time: f64,
    #[serde(default = "default_settle_time_reset_interval")]
    pub settle_time_reset_interval: f64,
    /// Falls back to the top-level value
    #[serde(default)]
    pub min_rpm_probe_interval: Option<f64>,
    #[serde(default = "default_min_pwm_step")]
    pub min_pwm_step: u8,
    #[serde(default)]
    pub fan_max_rpm_sanity_check: Option<u32>,
    #[serde(default)]
    pub pid: PidGains,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Kind of temperature source, the `type` field of a sensor entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Hwmon,
    Harddrive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    /// Defaults to the path
    #[serde(default)]
    pub name: Option<String>,
    /// `tempN_input` for hwmon, the device node for hard drives
    pub path: PathBuf,
    pub target_temperature: f32,
    #[serde(default = "default_temperature_scale")]
    pub temperature_scale: f32,
    #[serde(default)]
    pub critical_temperature: Option<f32>,
    /// Hard drives only: read the temperature even in standby
    #[serde(default)]
    pub measure_in_idle: bool,
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    server::BIND.to_string()
}

fn default_port() -> u16 {
    server::PORT
}

fn default_update_time() -> f64 {
    timing::UPDATE_INTERVAL_SECS
}

fn default_min_rpm_probe_interval() -> f64 {
    timing::MIN_RPM_PROBE_INTERVAL_SECS
}

fn default_storage_time() -> f64 {
    timing::HISTORY_STORAGE_SECS
}

fn default_min_pwm() -> u8 {
    fan::MIN_PWM
}

fn default_spinup_pwm() -> u8 {
    fan::SPINUP_PWM
}

fn default_spinup_time() -> f64 {
    timing::SPINUP_TIME_SECS
}

fn default_min_settle_time() -> f64 {
    timing::MIN_SETTLE_TIME_SECS
}

fn default_max_settle_time() -> f64 {
    timing::MAX_SETTLE_TIME_SECS
}

fn default_settle_time_reset_interval() -> f64 {
    timing::SETTLE_TIME_RESET_INTERVAL_SECS
}

fn default_min_pwm_step() -> u8 {
    fan::MIN_PWM_STEP
}

fn default_temperature_scale() -> f32 {
    temperature::DEFAULT_SCALE
}

/// Convert a seconds field, rejecting negative and non-finite values
pub(crate) fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| QuietfanError::invalid_config(field, format!("{} is not a valid duration: {}", value, e)))
}

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(QuietfanError::FileNotFound(path.to_path_buf()));
    }
    validation::validate_file_size(path)?;

    let content = fs::read_to_string(path).map_err(|e| QuietfanError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config = Config::from_json(&content)?;

    info!(path = %path.display(), fans = config.fans.len(), "Configuration loaded");
    Ok(config)
}

impl Config {
    /// Parse and validate a configuration document
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    pub fn update_interval(&self) -> Result<Duration> {
        seconds("update_time", self.update_time)
    }

    pub fn history_storage(&self) -> Result<Duration> {
        seconds("history.storage_time", self.history.storage_time)
    }

    /// Construct every fan engine, the registry and its history buffer
    pub fn build_registry(&self) -> Result<FanRegistry> {
        let update_interval = self.update_interval()?;

        let mut engines = Vec::with_capacity(self.fans.len());
        for fan in &self.fans {
            let hardware = Box::new(HwmonFan::new(&fan.pwm_path, &fan.rpm_path));
            let sensors = fan.sensors.iter().map(SensorConfig::build).collect();
            let engine = FanEngine::new(fan.display_name(), fan.settings(self)?, hardware, sensors)?;
            engines.push(engine);
        }

        let history = History::new(self.history_storage()?, update_interval);
        debug!(capacity = history.capacity(), "History buffer allocated");

        Ok(FanRegistry::new(engines, update_interval)?.with_history(history))
    }
}

impl FanConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.pwm_path.display().to_string())
    }

    /// Engine settings, with global fallbacks from `config`
    pub fn settings(&self, config: &Config) -> Result<FanSettings> {
        let probe_interval = self
            .min_rpm_probe_interval
            .unwrap_or(config.min_rpm_probe_interval);

        let mut settings = FanSettings::default()
            .with_min_pwm(self.min_pwm)
            .with_spinup(self.spinup_pwm, seconds("spinup_time", self.spinup_time)?)
            .with_settle_times(
                seconds("min_settle_time", self.min_settle_time)?,
                seconds("max_settle_time", self.max_settle_time)?,
                seconds("settle_time_reset_interval", self.settle_time_reset_interval)?,
            )
            .with_probe_interval(seconds("min_rpm_probe_interval", probe_interval)?)
            .with_min_pwm_step(self.min_pwm_step)
            .with_gains(self.pid)
            .with_update_interval(config.update_interval()?);
        if let Some(max_rpm) = self.fan_max_rpm_sanity_check {
            settings = settings.with_rpm_sanity_check(max_rpm);
        }
        Ok(settings)
    }
}

impl SensorConfig {
    /// The configured name, else the hwmon channel label, else the path
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match self.sensor_type {
            SensorType::Hwmon => read_hwmon_label(&self.path),
            SensorType::Harddrive => None,
        }
        .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Identifies the sensor within its fan; labels may repeat across chips
    pub fn identity(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn limits(&self) -> TemperatureLimits {
        TemperatureLimits {
            target_temperature: self.target_temperature,
            temperature_scale: self.temperature_scale,
            critical_temperature: self.critical_temperature,
        }
    }

    pub fn build(&self) -> Box<dyn Sensor> {
        match self.sensor_type {
            SensorType::Hwmon => Box::new(HwmonThermometer::new(
                self.display_name(),
                &self.path,
                self.limits(),
            )),
            SensorType::Harddrive => Box::new(
                Harddrive::new(self.display_name(), &self.path, self.limits())
                    .with_measure_in_idle(self.measure_in_idle),
            ),
        }
    }
}
