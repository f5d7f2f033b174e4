//! quietfan core library
//!
//! Closed-loop fan control that keeps fans at the lowest speed holding every
//! attached temperature sensor near its target.
//!
//! # Module Structure
//!
//! - `engine/` - controller, minimum-power tracker, fan state machine, registry
//! - `hw/` - fan and sensor capabilities with hwmon and disk implementations
//! - `data/` - configuration types, loading and validation
//! - `status`, `history` - snapshot handoff to readers
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use qf_core::load_config;
//!
//! let config = load_config(Path::new("/etc/quietfan/quietfan.json")).unwrap();
//! let mut registry = config.build_registry().unwrap();
//! registry.enable_manual_control().unwrap();
//! let next = registry.tick().unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod history;
pub mod status;

pub use qf_error::{QuietfanError, Result};
pub use qf_protocol::{
    ControllerStatus, FanState, FanStatus, SensorKind, SensorStatus, StatusSnapshot,
};

pub use data::{load_config, Config, FanConfig, SensorConfig, SensorType};
pub use engine::{
    ControllerOutput, FanEngine, FanRegistry, FanSettings, MinPowerTracker, PidGains,
    SmoothingController, Timeout,
};
pub use history::History;
pub use hw::{
    FanHardware, Harddrive, HwmonFan, HwmonThermometer, Sensor, StaticSensor, StaticSensorHandle,
    TemperatureLimits,
};
pub use status::StatusHandle;
