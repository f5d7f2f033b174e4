//! Hardware interaction modules
//!
//! Capability traits for fans and temperature sources, and their hwmon and
//! disk implementations.

mod control;
mod fan;
mod harddrive;
mod sensor;
mod thermometer;

pub use control::{
    enable_manual_pwm, read_fan_rpm, read_hwmon_label, read_load_average, read_temperature, set_pwm_value,
};
pub use fan::{FanHardware, HwmonFan};
pub use harddrive::{parse_hdparm_state, parse_smart_temperature, Harddrive};
pub use sensor::{Sensor, StaticSensor, StaticSensorHandle, TemperatureLimits};
pub use thermometer::HwmonThermometer;
