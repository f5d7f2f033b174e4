//! Shared status protocol types for quietfan
//!
//! The control loop publishes a [`StatusSnapshot`] once per tick; the status
//! server serializes it as JSON. Path validation for configured hardware
//! files also lives here so the daemon and the core agree on what is allowed.

use serde::{Deserialize, Serialize};

/// Maximum path length for security validation
const MAX_PATH_LENGTH: usize = 256;

const ALLOWED_PATH_PREFIXES: &[&str] = &["/sys/class/hwmon/", "/sys/devices/"];

const ALLOWED_BLOCK_DEVICE_PREFIXES: &[&str] = &["/dev/"];

const FORBIDDEN_PATH_COMPONENTS: &[&str] = &[
    "..",      // Path traversal
    "//",      // Double slash (path normalization bypass)
    "\0",      // Null byte injection
    "\n",      // Newline injection
    "\r",      // Carriage return injection
    "$(",      // Command substitution
    "`",       // Command substitution (backtick)
    ";",       // Command chaining
    "|",       // Pipe
    "&",       // Background execution
    ">",       // Output redirection
    "<",       // Input redirection
    "\\",      // Backslash (escape sequences)
    "'",       // Single quote (shell injection)
    "\"",      // Double quote (shell injection)
];

// ============================================================================
// Status Records
// ============================================================================

/// Lifecycle state of a single fan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanState {
    /// Driven at (at least) the spin-up PWM until the spin-up timer elapses
    Spinup,
    /// Normal closed-loop control
    Running,
    /// Held at the learned floor before stopping
    Settle,
    /// PWM 0
    Stopped,
}

impl FanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanState::Spinup => "spinup",
            FanState::Running => "running",
            FanState::Settle => "settle",
            FanState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for FanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of temperature source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Hwmon,
    Harddrive,
    Virtual,
}

/// Status of one temperature sensor attached to a fan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub name: String,
    pub kind: SensorKind,
    /// Last cached temperature in °C, `None` when not measured this tick
    pub temperature: Option<f32>,
    pub target_temperature: f32,
    pub temperature_scale: f32,
    pub critical_temperature: Option<f32>,
    /// Normalized error, positive means too hot
    pub error: f64,
    pub activity: f32,
    /// Disk spin state, only reported by hard drives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spinning: Option<bool>,
}

/// Internal state of the smoothing controller after a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub max_error: f64,
    /// Smoothed derivative of the channel predicted to be hottest next tick
    pub derivative: f64,
    pub max_derivative: f64,
    pub max_abs_derivative: f64,
    pub integrator: f64,
    /// Raw, unclamped PWM command
    pub command: f64,
}

/// Status of one fan after a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanStatus {
    pub name: String,
    pub state: FanState,
    /// RPM used for this tick (after glitch substitution)
    pub rpm: Option<u32>,
    /// Last PWM value written to the hardware
    pub pwm: Option<u8>,
    /// Current learned minimum PWM
    pub min_pwm: u8,
    pub probing: bool,
    /// Current settle timeout limit in seconds
    pub settle_time: f64,
    /// Remaining spin-up time in seconds (0 outside of spinup)
    pub spinup_remaining: f64,
    pub controller: ControllerStatus,
    pub sensors: Vec<SensorStatus>,
}

/// Complete status of the controller, published once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Seconds since the previous tick
    pub dt: f64,
    /// Seconds until the next tick
    pub next_update: f64,
    /// True when the critical temperature failsafe forced full power this tick
    pub failsafe_active: bool,
    pub fans: Vec<FanStatus>,
}

impl StatusSnapshot {
    pub fn fan(&self, name: &str) -> Option<&FanStatus> {
        self.fans.iter().find(|f| f.name == name)
    }
}

/// Response of the history endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub capacity: usize,
    pub snapshots: Vec<StatusSnapshot>,
}

/// Response of the health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub ticks: u64,
}

// ============================================================================
// Path Validation
// ============================================================================

fn validate_common(path: &str) -> Result<(), String> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(format!(
            "Path too long: {} > {} chars",
            path.len(),
            MAX_PATH_LENGTH
        ));
    }

    if path.is_empty() {
        return Err("Path cannot be empty".into());
    }

    if !path.starts_with('/') {
        return Err("Path must be absolute".into());
    }

    for forbidden in FORBIDDEN_PATH_COMPONENTS {
        if path.contains(forbidden) {
            return Err(format!("Path contains forbidden sequence: {:?}", forbidden));
        }
    }

    for c in path.chars() {
        if !c.is_ascii_alphanumeric() && c != '/' && c != '-' && c != '_' && c != '.' && c != ':' {
            return Err(format!("Path contains invalid character: {:?}", c));
        }
    }

    Ok(())
}

/// Validate a hwmon attribute path (temperature input, fan input, pwm)
pub fn validate_hwmon_path(path: &str) -> Result<(), String> {
    validate_common(path)?;

    let allowed = ALLOWED_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix));
    if !allowed {
        return Err(format!("Path must be under one of: {:?}", ALLOWED_PATH_PREFIXES));
    }

    if let Ok(canonical) = std::fs::canonicalize(path) {
        let canonical_str = canonical.to_string_lossy();
        let canonical_allowed = ALLOWED_PATH_PREFIXES
            .iter()
            .any(|prefix| canonical_str.starts_with(prefix));

        if !canonical_allowed {
            return Err(format!(
                "Canonical path {} is outside allowed directories",
                canonical_str
            ));
        }
    }

    Ok(())
}

/// Validate a `pwmN` control file path
pub fn validate_pwm_target_path(path: &str) -> Result<(), String> {
    validate_hwmon_path(path)?;

    let file_name = path.rsplit('/').next().unwrap_or("");
    let suffix = file_name.strip_prefix("pwm").unwrap_or("");
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return Err("PWM path does not point to a pwmN control file".into());
    }

    Ok(())
}

/// Validate a block device path handed to `smartctl`/`hdparm`
pub fn validate_block_device_path(path: &str) -> Result<(), String> {
    validate_common(path)?;

    let allowed = ALLOWED_BLOCK_DEVICE_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix));
    if !allowed {
        return Err(format!(
            "Device path must be under one of: {:?}",
            ALLOWED_BLOCK_DEVICE_PREFIXES
        ));
    }

    if path.rsplit('/').next().map_or(true, str::is_empty) {
        return Err("Device path has no device name".into());
    }

    Ok(())
}
