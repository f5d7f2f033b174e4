//! Temperature sensor capability
//!
//! A sensor caches its last reading on `refresh`; the engine only ever looks
//! at the cached values, so a tick sees one consistent reading per sensor.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use qf_error::Result;
use qf_protocol::{SensorKind, SensorStatus};
use serde::{Deserialize, Serialize};

use crate::constants::temperature;

/// Target and limits of one temperature source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureLimits {
    pub target_temperature: f32,
    /// °C per unit of normalized error
    pub temperature_scale: f32,
    pub critical_temperature: Option<f32>,
}

impl TemperatureLimits {
    pub fn new(target_temperature: f32, temperature_scale: f32) -> Self {
        Self {
            target_temperature,
            temperature_scale,
            critical_temperature: None,
        }
    }

    pub fn with_critical(mut self, critical_temperature: f32) -> Self {
        self.critical_temperature = Some(critical_temperature);
        self
    }
}

pub trait Sensor: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> SensorKind;

    /// Take a new reading. `dt` is the time since the previous refresh.
    fn refresh(&mut self, dt: Duration) -> Result<()>;

    /// Last temperature in °C, `None` when no reading is available
    fn cached_temperature(&self) -> Option<f32>;

    /// Activity hint in `[0, ...)`, e.g. load average or disk I/O
    fn cached_activity(&self) -> f32;

    fn limits(&self) -> &TemperatureLimits;

    /// Disk spin state, `None` for sources that do not spin
    fn spinning(&self) -> Option<bool> {
        None
    }

    fn target_temperature(&self) -> f32 {
        self.limits().target_temperature
    }

    fn temperature_scale(&self) -> f32 {
        self.limits().temperature_scale
    }

    fn critical_temperature(&self) -> Option<f32> {
        self.limits().critical_temperature
    }

    /// `(temperature - target) / scale`, or -1 when there is no reading
    fn normalized_error(&self) -> f64 {
        match self.cached_temperature() {
            Some(t) => {
                (f64::from(t) - f64::from(self.target_temperature()))
                    / f64::from(self.temperature_scale())
            }
            None => temperature::UNSET_ERROR,
        }
    }

    /// True when the cached reading is at or above the critical limit
    fn is_critical(&self) -> bool {
        match (self.cached_temperature(), self.critical_temperature()) {
            (Some(t), Some(critical)) => t >= critical,
            _ => false,
        }
    }

    fn status(&self) -> SensorStatus {
        SensorStatus {
            name: self.name().to_string(),
            kind: self.kind(),
            temperature: self.cached_temperature(),
            target_temperature: self.target_temperature(),
            temperature_scale: self.temperature_scale(),
            critical_temperature: self.critical_temperature(),
            error: self.normalized_error(),
            activity: self.cached_activity(),
            spinning: self.spinning(),
        }
    }
}

/// Sensor whose reading is set from the outside through a [`StaticSensorHandle`].
///
/// Used for simulation and for driving the engine in tests.
pub struct StaticSensor {
    name: String,
    limits: TemperatureLimits,
    source: Arc<Mutex<Option<f32>>>,
    cached: Option<f32>,
}

/// Setter side of a [`StaticSensor`]
#[derive(Clone)]
pub struct StaticSensorHandle(Arc<Mutex<Option<f32>>>);

impl StaticSensorHandle {
    pub fn set(&self, temperature: Option<f32>) {
        *self.0.lock() = temperature;
    }
}

impl StaticSensor {
    pub fn new(name: impl Into<String>, limits: TemperatureLimits) -> (Self, StaticSensorHandle) {
        let source = Arc::new(Mutex::new(None));
        let sensor = Self {
            name: name.into(),
            limits,
            source: Arc::clone(&source),
            cached: None,
        };
        (sensor, StaticSensorHandle(source))
    }
}

impl Sensor for StaticSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Virtual
    }

    fn refresh(&mut self, _dt: Duration) -> Result<()> {
        self.cached = *self.source.lock();
        Ok(())
    }

    fn cached_temperature(&self) -> Option<f32> {
        self.cached
    }

    fn cached_activity(&self) -> f32 {
        0.0
    }

    fn limits(&self) -> &TemperatureLimits {
        &self.limits
    }
}
