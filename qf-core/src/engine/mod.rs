//! Fan control engine modules
//!
//! Controller, minimum-power tracker, per-fan state machine and the registry
//! that ticks all fans.

mod controller;
mod fan;
mod min_power;
mod registry;
mod timeout;

pub use controller::{ControllerOutput, PidGains, SmoothingController};
pub use fan::{FanEngine, FanSettings};
pub use min_power::MinPowerTracker;
pub use registry::FanRegistry;
pub use timeout::{clamp, Timeout};
