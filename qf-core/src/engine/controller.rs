//! Multi-channel smoothing PID controller
//!
//! Converts a vector of normalized temperature errors (one per sensor) into a
//! PWM command. The proportional and integral terms follow the hottest
//! channel; the derivative term follows the channel predicted to be hottest
//! after the next step.
//!
//! # Derivative smoothing
//!
//! Each channel's derivative is an exponentially weighted moving average with
//! a half-life expressed in seconds, so the smoothing does not depend on the
//! tick period:
//!
//! ```text
//! decay = 2^(-dt / half_life)
//! d     = decay * d_prev + (1 - decay) * (e - e_prev) / dt
//! ```

use std::time::Duration;

use qf_error::{QuietfanError, Result};
use qf_protocol::ControllerStatus;
use serde::{Deserialize, Serialize};

use crate::constants::{controller, temperature};

/// Controller gains and limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    /// Derivative half-life in seconds
    #[serde(default = "default_derivative_smoothing")]
    pub derivative_smoothing: f64,
    /// Upper bound of the integral contribution `ki * integrator`
    #[serde(default = "default_max_output")]
    pub max_output: f64,
}

fn default_kp() -> f64 {
    controller::KP
}

fn default_ki() -> f64 {
    controller::KI
}

fn default_kd() -> f64 {
    controller::KD
}

fn default_derivative_smoothing() -> f64 {
    controller::DERIVATIVE_SMOOTHING_SECS
}

fn default_max_output() -> f64 {
    controller::MAX_OUTPUT
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: controller::KP,
            ki: controller::KI,
            kd: controller::KD,
            derivative_smoothing: controller::DERIVATIVE_SMOOTHING_SECS,
            max_output: controller::MAX_OUTPUT,
        }
    }
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            ..Self::default()
        }
    }

    pub fn with_derivative_smoothing(mut self, half_life_secs: f64) -> Self {
        self.derivative_smoothing = half_life_secs;
        self
    }

    pub fn with_max_output(mut self, max_output: f64) -> Self {
        self.max_output = max_output;
        self
    }

    /// Largest integrator value, so that `ki * integrator <= max_output`
    fn integrator_limit(&self) -> f64 {
        if self.ki > 0.0 {
            (self.max_output / self.ki).max(0.0)
        } else {
            0.0
        }
    }
}

/// Result of one controller update
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerOutput {
    /// Raw PWM command, not clamped
    pub command: f64,
    pub max_error: f64,
    /// Derivative of the channel with the highest `e + d * dt`
    pub derivative: f64,
    /// Signed maximum over all channel derivatives
    pub max_derivative: f64,
    pub max_abs_derivative: f64,
}

#[derive(Debug, Clone)]
pub struct SmoothingController {
    name: String,
    gains: PidGains,
    integrator: f64,
    previous_errors: Option<Vec<f64>>,
    previous_derivatives: Vec<f64>,
    previous_max_error: Option<f64>,
    /// Horizon used to pick the derivative channel, the last nonzero `dt`
    selection_horizon: f64,
    last: ControllerOutput,
}

impl SmoothingController {
    /// `name` identifies the owning fan in errors
    pub fn new(name: impl Into<String>, gains: PidGains) -> Self {
        Self {
            name: name.into(),
            gains,
            integrator: 0.0,
            previous_errors: None,
            previous_derivatives: Vec::new(),
            previous_max_error: None,
            selection_horizon: 0.0,
            last: ControllerOutput::default(),
        }
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn integrator(&self) -> f64 {
        self.integrator
    }

    pub fn reset_integrator(&mut self) {
        self.integrator = 0.0;
    }

    /// Feed one set of normalized errors observed `dt` after the previous set
    pub fn update(&mut self, errors: &[f64], dt: Duration) -> Result<ControllerOutput> {
        let dt_secs = dt.as_secs_f64();

        match self.previous_errors.as_mut() {
            None => {
                self.previous_errors = Some(errors.to_vec());
                self.previous_derivatives = vec![0.0; errors.len()];
            }
            Some(previous) => {
                if previous.len() != errors.len() {
                    return Err(QuietfanError::ConfigurationMismatch {
                        fan: self.name.clone(),
                        expected: previous.len(),
                        actual: errors.len(),
                    });
                }

                if dt_secs > 0.0 {
                    let decay = if self.gains.derivative_smoothing > 0.0 {
                        (-dt_secs / self.gains.derivative_smoothing).exp2()
                    } else {
                        0.0
                    };

                    for ((d, prev), &e) in self
                        .previous_derivatives
                        .iter_mut()
                        .zip(previous.iter_mut())
                        .zip(errors)
                    {
                        let raw = (e - *prev) / dt_secs;
                        *d = decay * *d + (1.0 - decay) * raw;
                        *prev = e;
                    }
                }
            }
        }

        let max_error = errors
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |m| m.max(e))))
            .unwrap_or(temperature::UNSET_ERROR);

        if dt_secs > 0.0 {
            self.selection_horizon = dt_secs;
        }

        let mut derivative = 0.0;
        let mut best_prediction = f64::NEG_INFINITY;
        let mut max_derivative = f64::NEG_INFINITY;
        let mut max_abs_derivative = 0.0_f64;
        for (&e, &d) in errors.iter().zip(&self.previous_derivatives) {
            let predicted = e + d * self.selection_horizon;
            if predicted > best_prediction {
                best_prediction = predicted;
                derivative = d;
            }
            max_derivative = max_derivative.max(d);
            max_abs_derivative = max_abs_derivative.max(d.abs());
        }
        if !max_derivative.is_finite() {
            max_derivative = 0.0;
        }

        match self.previous_max_error {
            None => self.previous_max_error = Some(max_error),
            Some(previous_max) if dt_secs > 0.0 => {
                self.integrator += dt_secs * (previous_max + max_error) / 2.0;
                self.previous_max_error = Some(max_error);
            }
            Some(_) => {}
        }
        self.integrator = self.integrator.clamp(0.0, self.gains.integrator_limit());

        let command = self.gains.kp * max_error
            + self.gains.ki * self.integrator
            + self.gains.kd * derivative;

        self.last = ControllerOutput {
            command,
            max_error,
            derivative,
            max_derivative,
            max_abs_derivative,
        };
        Ok(self.last)
    }

    pub fn last_output(&self) -> ControllerOutput {
        self.last
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            max_error: self.last.max_error,
            derivative: self.last.derivative,
            max_derivative: self.last.max_derivative,
            max_abs_derivative: self.last.max_abs_derivative,
            integrator: self.integrator,
            command: self.last.command,
        }
    }
}
