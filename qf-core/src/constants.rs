//! Constants and configuration defaults for quietfan
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for all configuration values.
//! Never use magic numbers in other files - add them here first.

/// System paths
pub mod paths {
    /// Default configuration file
    pub const CONFIG_FILE: &str = "/etc/quietfan/quietfan.json";

    /// Load average source for CPU-bound sensors
    pub const LOADAVG: &str = "/proc/loadavg";

    /// Block device statistics, `{}` is the kernel device name
    pub const BLOCK_STAT_DIR: &str = "/sys/block";

    /// systemd journal socket; journald logging is used when it exists
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";
}

/// External programs used by the disk sensor
pub mod commands {
    pub const HDPARM: &str = "hdparm";
    pub const SMARTCTL: &str = "smartctl";
}

/// PWM control constants
pub mod pwm {
    /// PWM value of a stopped fan
    pub const STOPPED: u8 = 0;

    /// Lowest PWM the minimum-power tracker may learn
    pub const MIN_LEARNED: u8 = 1;

    /// Maximum PWM value (full speed)
    pub const MAX_VALUE: u8 = 255;

    /// PWM enable values
    pub mod enable {
        /// Manual PWM control
        pub const MANUAL: u8 = 1;
    }
}

/// Temperature constants
pub mod temperature {
    /// Temperature readings are in millidegrees, divide by this to get Celsius
    pub const MILLIDEGREE_DIVISOR: f32 = 1000.0;

    /// Normalized error reported by a sensor that has no cached temperature
    pub const UNSET_ERROR: f64 = -1.0;

    /// Default temperature scale (°C per unit of normalized error)
    pub const DEFAULT_SCALE: f32 = 10.0;
}

/// Timing defaults, all in seconds
pub mod timing {
    /// Control loop period
    pub const UPDATE_INTERVAL_SECS: f64 = 30.0;

    /// Spin-up duration
    pub const SPINUP_TIME_SECS: f64 = 1.0;

    /// Lower bound of the settle timeout
    pub const MIN_SETTLE_TIME_SECS: f64 = 120.0;

    /// Upper bound of the settle timeout
    pub const MAX_SETTLE_TIME_SECS: f64 = 3600.0;

    /// Period of the settle timeout decay while stopped
    pub const SETTLE_TIME_RESET_INTERVAL_SECS: f64 = 3600.0;

    /// Minimum power re-probe interval (30 days)
    pub const MIN_RPM_PROBE_INTERVAL_SECS: f64 = 30.0 * 24.0 * 3600.0;

    /// Time span of status history kept in memory
    pub const HISTORY_STORAGE_SECS: f64 = 3600.0;

    /// Consecutive failed ticks before the daemon gives up
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
}

/// Per-fan defaults
pub mod fan {
    /// Initial (and ceiling) minimum PWM
    pub const MIN_PWM: u8 = 80;

    /// PWM applied while spinning up
    pub const SPINUP_PWM: u8 = 128;

    /// Minimum-power tracker step
    pub const MIN_PWM_STEP: u8 = 1;
}

/// Controller defaults
pub mod controller {
    pub const KP: f64 = 20.0;
    pub const KI: f64 = 0.5;
    pub const KD: f64 = 600.0;

    /// Derivative half-life in seconds
    pub const DERIVATIVE_SMOOTHING_SECS: f64 = 120.0;

    /// Upper bound of the integral contribution
    pub const MAX_OUTPUT: f64 = 255.0;
}

/// Status server defaults
pub mod server {
    pub const BIND: &str = "127.0.0.1";
    pub const PORT: u16 = 9191;
}

/// File size limits for security
pub mod limits {
    /// Maximum configuration file size (1MB)
    pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

    /// Maximum number of fans
    pub const MAX_FANS: usize = 32;

    /// Maximum number of sensors per fan
    pub const MAX_SENSORS_PER_FAN: usize = 64;

    /// Maximum name length
    pub const MAX_NAME_LENGTH: usize = 128;

    /// Maximum number of retained status snapshots
    pub const MAX_HISTORY_ENTRIES: usize = 100_000;
}
