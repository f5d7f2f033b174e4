//! Configuration types, loading and validation

mod config;
mod validation;

pub use config::{
    load_config, Config, FanConfig, HistoryConfig, SensorConfig, SensorType, StatusServerConfig,
};
pub use validation::{
    validate_config, validate_device_path, validate_fan, validate_fan_path, validate_file_size,
    validate_name, validate_pwm_path, validate_sensor, validate_temp_path, validate_unique,
};
