//! Adaptive minimum PWM discovery
//!
//! While probing, the floor is lowered by one step per update until the fan
//! stalls. A stall raises the floor by one step and stops probing until the
//! probe interval elapses, after which probing resumes from the current value.

use std::time::Duration;

use tracing::{debug, info};

use super::timeout::Timeout;
use crate::constants::pwm;

#[derive(Debug, Clone)]
pub struct MinPowerTracker {
    value: u8,
    step: u8,
    probing: bool,
    probe_timeout: Timeout,
}

impl MinPowerTracker {
    /// Start probing downwards from `initial`
    pub fn new(initial: u8, step: u8, probe_interval: Duration) -> Self {
        Self {
            value: initial.max(pwm::MIN_LEARNED),
            step: step.max(1),
            probing: true,
            probe_timeout: Timeout::new(probe_interval),
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    /// Advance by `dt` and return the current floor
    pub fn update(&mut self, dt: Duration) -> u8 {
        if self.probing {
            self.value = self.value.saturating_sub(self.step).max(pwm::MIN_LEARNED);
        } else if self.probe_timeout.tick(dt) {
            info!(min_pwm = self.value, "Resuming minimum PWM probing");
            self.probing = true;
        }
        self.value
    }

    /// The fan stalled at the current floor
    pub fn failed(&mut self) {
        self.value = self.value.saturating_add(self.step).min(pwm::MAX_VALUE);
        self.probing = false;
        self.probe_timeout.reset();
        debug!(min_pwm = self.value, "Minimum PWM backed off");
    }
}
