//! hwmon `tempN_input` thermometer

use std::path::PathBuf;
use std::time::Duration;

use qf_error::Result;
use qf_protocol::SensorKind;
use tracing::debug;

use super::control;
use super::sensor::{Sensor, TemperatureLimits};
use crate::constants::paths;

pub struct HwmonThermometer {
    name: String,
    path: PathBuf,
    loadavg_path: PathBuf,
    limits: TemperatureLimits,
    temperature: Option<f32>,
    activity: f32,
}

impl HwmonThermometer {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, limits: TemperatureLimits) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            loadavg_path: PathBuf::from(paths::LOADAVG),
            limits,
            temperature: None,
            activity: 0.0,
        }
    }

    /// Read activity from a different load average file
    pub fn with_loadavg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.loadavg_path = path.into();
        self
    }
}

impl Sensor for HwmonThermometer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Hwmon
    }

    fn refresh(&mut self, _dt: Duration) -> Result<()> {
        self.temperature = Some(control::read_temperature(&self.path)?);
        self.activity = match control::read_load_average(&self.loadavg_path) {
            Ok(load) => load,
            Err(e) => {
                debug!(sensor = %self.name, error = %e, "Load average unavailable");
                0.0
            }
        };
        Ok(())
    }

    fn cached_temperature(&self) -> Option<f32> {
        self.temperature
    }

    fn cached_activity(&self) -> f32 {
        self.activity
    }

    fn limits(&self) -> &TemperatureLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_refresh_reads_temperature_and_load() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("temp1_input");
        let loadavg = dir.path().join("loadavg");
        fs::write(&temp, "52000\n").unwrap();
        fs::write(&loadavg, "1.25 0.80 0.50 2/300 999\n").unwrap();

        let mut sensor = HwmonThermometer::new("cpu", &temp, TemperatureLimits::new(50.0, 10.0))
            .with_loadavg_path(&loadavg);
        assert_eq!(sensor.cached_temperature(), None);

        sensor.refresh(Duration::from_secs(30)).unwrap();
        assert_eq!(sensor.cached_temperature(), Some(52.0));
        assert_eq!(sensor.cached_activity(), 1.25);
        assert!((sensor.normalized_error() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_missing_loadavg_is_zero_activity() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("temp1_input");
        fs::write(&temp, "30000").unwrap();

        let mut sensor = HwmonThermometer::new("cpu", &temp, TemperatureLimits::new(50.0, 10.0))
            .with_loadavg_path(dir.path().join("nope"));
        sensor.refresh(Duration::ZERO).unwrap();
        assert_eq!(sensor.cached_activity(), 0.0);
    }

    #[test]
    fn test_missing_input_is_error() {
        let dir = TempDir::new().unwrap();
        let mut sensor = HwmonThermometer::new(
            "cpu",
            dir.path().join("temp9_input"),
            TemperatureLimits::new(50.0, 10.0),
        );
        assert!(sensor.refresh(Duration::ZERO).is_err());
    }
}
