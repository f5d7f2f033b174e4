//! Unified error handling for quietfan
//!
//! This crate provides the single error type shared by the control engine,
//! the hardware drivers and the daemon.

use std::io;
use std::path::PathBuf;

/// Result type alias using QuietfanError
pub type Result<T> = std::result::Result<T, QuietfanError>;

/// Unified error type for all quietfan operations
#[derive(thiserror::Error, Debug)]
pub enum QuietfanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read sensor {sensor}: {reason}")]
    SensorRead {
        sensor: String,
        reason: String,
    },

    #[error("Failed to read fan RPM from {path}: {reason}")]
    FanRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write PWM to {path}: {reason}")]
    PwmWrite {
        path: PathBuf,
        reason: String,
    },

    /// A reading outside the plausible range. The engine recovers from these
    /// locally; the variant exists so drivers can report them uniformly.
    #[error("Glitched reading from {source_name}: {value} exceeds {limit}")]
    GlitchedReading {
        source_name: String,
        value: u32,
        limit: u32,
    },

    #[error("Command `{command}` failed: {reason}")]
    Command {
        command: String,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Duplicate {kind} names: {}", .names.join(", "))]
    DuplicateName {
        kind: &'static str,
        names: Vec<String>,
    },

    /// The number of error channels fed to a controller changed at runtime.
    #[error("Fan {fan}: sensor count changed from {expected} to {actual}")]
    ConfigurationMismatch {
        fan: String,
        expected: usize,
        actual: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl QuietfanError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration value error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor read error
    pub fn sensor_read(sensor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorRead {
            sensor: sensor.into(),
            reason: reason.into(),
        }
    }

    /// Errors that must stop the control loop instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationMismatch { .. } | Self::DuplicateName { .. }
        )
    }
}

// Allow converting from String to QuietfanError
impl From<String> for QuietfanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to QuietfanError
impl From<&str> for QuietfanError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
