//! Per-fan control engine
//!
//! Each tick the engine reads the fan speed, refreshes its sensors, runs the
//! smoothing controller and the minimum-power tracker, and drives the fan
//! through its lifecycle:
//!
//! ```text
//!            spin-up timer                 error < 0 and at floor
//!  spinup ----------------> running ---------------------------------> settle
//!    ^                        ^  |                                       |  |
//!    |                        |  +---------- error > 0 or above floor ---+  |
//!    |  stall (running/settle)                                             |
//!    +-----------------------------+     settle timer                      |
//!    |                                <-------------------------------------+
//!    +---- error > 0 ---- stopped
//! ```
//!
//! # Invariants
//!
//! - The PWM written is 0 only in `stopped`.
//! - Outside of `stopped` a nonzero command is never below the learned floor.
//! - Identical consecutive PWM values are written once.

use std::collections::HashSet;
use std::time::Duration;

use qf_error::{QuietfanError, Result};
use qf_protocol::{FanState, FanStatus};
use tracing::{debug, error, info, info_span, trace, warn, Span};

use super::controller::{ControllerOutput, PidGains, SmoothingController};
use super::min_power::MinPowerTracker;
use super::timeout::{clamp, Timeout};
use crate::constants::{fan, pwm, timing};
use crate::hw::{FanHardware, Sensor};

/// Static configuration of one fan engine
#[derive(Debug, Clone, PartialEq)]
pub struct FanSettings {
    /// Initial minimum PWM, the starting point of probing
    pub min_pwm: u8,
    pub spinup_pwm: u8,
    pub spinup_time: Duration,
    pub min_settle_time: Duration,
    pub max_settle_time: Duration,
    pub settle_time_reset_interval: Duration,
    pub min_rpm_probe_interval: Duration,
    pub min_pwm_step: u8,
    /// Readings above this RPM are treated as glitches
    pub fan_max_rpm_sanity_check: Option<u32>,
    pub gains: PidGains,
    /// Regular tick period, used for the wake-up hint
    pub update_interval: Duration,
}

impl Default for FanSettings {
    fn default() -> Self {
        Self {
            min_pwm: fan::MIN_PWM,
            spinup_pwm: fan::SPINUP_PWM,
            spinup_time: Duration::from_secs_f64(timing::SPINUP_TIME_SECS),
            min_settle_time: Duration::from_secs_f64(timing::MIN_SETTLE_TIME_SECS),
            max_settle_time: Duration::from_secs_f64(timing::MAX_SETTLE_TIME_SECS),
            settle_time_reset_interval: Duration::from_secs_f64(
                timing::SETTLE_TIME_RESET_INTERVAL_SECS,
            ),
            min_rpm_probe_interval: Duration::from_secs_f64(timing::MIN_RPM_PROBE_INTERVAL_SECS),
            min_pwm_step: fan::MIN_PWM_STEP,
            fan_max_rpm_sanity_check: None,
            gains: PidGains::default(),
            update_interval: Duration::from_secs_f64(timing::UPDATE_INTERVAL_SECS),
        }
    }
}

impl FanSettings {
    pub fn with_min_pwm(mut self, min_pwm: u8) -> Self {
        self.min_pwm = min_pwm;
        self
    }

    pub fn with_spinup(mut self, pwm: u8, time: Duration) -> Self {
        self.spinup_pwm = pwm;
        self.spinup_time = time;
        self
    }

    pub fn with_settle_times(mut self, min: Duration, max: Duration, reset_interval: Duration) -> Self {
        self.min_settle_time = min;
        self.max_settle_time = max;
        self.settle_time_reset_interval = reset_interval;
        self
    }

    pub fn with_min_pwm_step(mut self, step: u8) -> Self {
        self.min_pwm_step = step;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.min_rpm_probe_interval = interval;
        self
    }

    pub fn with_rpm_sanity_check(mut self, max_rpm: u32) -> Self {
        self.fan_max_rpm_sanity_check = Some(max_rpm);
        self
    }

    pub fn with_gains(mut self, gains: PidGains) -> Self {
        self.gains = gains;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }
}

pub struct FanEngine {
    name: String,
    settings: FanSettings,
    hardware: Box<dyn FanHardware>,
    sensors: Vec<Box<dyn Sensor>>,
    controller: SmoothingController,
    tracker: MinPowerTracker,
    state: FanState,
    last_pwm: Option<u8>,
    last_good_rpm: Option<u32>,
    current_rpm: Option<u32>,
    spinup_timeout: Timeout,
    settle_timeout: Timeout,
    settle_decay_timeout: Timeout,
    /// Every write this step goes out as 255 (critical temperature failsafe)
    full_power: bool,
    span: Span,
}

impl FanEngine {
    /// Create an engine in `spinup` with a fresh spin-up timer.
    ///
    /// The engine's span is created under the caller's current span.
    pub fn new(
        name: impl Into<String>,
        settings: FanSettings,
        hardware: Box<dyn FanHardware>,
        sensors: Vec<Box<dyn Sensor>>,
    ) -> Result<Self> {
        let name = name.into();

        let mut duplicates = Vec::new();
        {
            let mut seen = HashSet::new();
            for sensor in &sensors {
                if !seen.insert(sensor.name()) {
                    duplicates.push(sensor.name().to_string());
                }
            }
        }
        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            return Err(QuietfanError::DuplicateName {
                kind: "sensor",
                names: duplicates,
            });
        }

        let span = info_span!("fan", name = %name);
        let controller = SmoothingController::new(name.clone(), settings.gains);
        let tracker = MinPowerTracker::new(
            settings.min_pwm,
            settings.min_pwm_step,
            settings.min_rpm_probe_interval,
        );

        span.in_scope(|| {
            debug!(
                hardware = %hardware.describe(),
                sensors = sensors.len(),
                min_pwm = settings.min_pwm,
                spinup_pwm = settings.spinup_pwm,
                "Fan engine created"
            );
        });

        Ok(Self {
            spinup_timeout: Timeout::new(settings.spinup_time),
            settle_timeout: Timeout::new(settings.min_settle_time),
            settle_decay_timeout: Timeout::new(settings.settle_time_reset_interval),
            name,
            settings,
            hardware,
            sensors,
            controller,
            tracker,
            state: FanState::Spinup,
            last_pwm: None,
            last_good_rpm: None,
            current_rpm: None,
            full_power: false,
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FanState {
        self.state
    }

    pub fn last_pwm(&self) -> Option<u8> {
        self.last_pwm
    }

    pub fn min_pwm(&self) -> u8 {
        self.tracker.value()
    }

    pub fn settle_limit(&self) -> Duration {
        self.settle_timeout.limit()
    }

    pub fn controller(&self) -> &SmoothingController {
        &self.controller
    }

    pub fn sensors(&self) -> &[Box<dyn Sensor>] {
        &self.sensors
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Switch the PWM channel to manual control
    pub fn enable_manual(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        self.hardware.enable_manual()
    }

    /// Run one control step, `dt` after the previous one.
    ///
    /// Returns the time until the engine wants the next update and its status.
    pub fn update(&mut self, dt: Duration) -> Result<(Duration, FanStatus)> {
        self.sample(dt)?;
        self.actuate(dt, false)
    }

    /// First half of `update`: read the fan speed and refresh every sensor.
    /// Nothing is written to the fan.
    pub fn sample(&mut self, dt: Duration) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.current_rpm = self.read_rpm()?;
        for sensor in self.sensors.iter_mut() {
            sensor.refresh(dt)?;
        }
        Ok(())
    }

    /// Second half of `update`: run the controller and the state machine on
    /// the values from the last `sample`.
    ///
    /// With `full_power` the state machine still advances but every write
    /// goes out as 255, so no lower value reaches the fan in between.
    pub fn actuate(&mut self, dt: Duration, full_power: bool) -> Result<(Duration, FanStatus)> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.full_power = full_power;
        let result = self.step(dt);
        self.full_power = false;
        result?;

        Ok((self.wakeup_hint(), self.status()))
    }

    fn step(&mut self, dt: Duration) -> Result<()> {
        let rpm = self.current_rpm;
        let errors: Vec<f64> = self.sensors.iter().map(|s| s.normalized_error()).collect();

        let output = self.controller.update(&errors, dt)?;
        let floor = self.tracker.update(dt);
        let clamped = clamp_command(output.command, floor);

        trace!(
            state = %self.state,
            rpm = ?rpm,
            max_error = output.max_error,
            command = output.command,
            floor,
            clamped,
            "Control step"
        );

        let stalled = matches!(self.state, FanState::Running | FanState::Settle) && rpm == Some(0);
        if stalled {
            self.tracker.failed();
            warn!(
                state = %self.state,
                pwm = ?self.last_pwm,
                new_min_pwm = self.tracker.value(),
                "Fan stalled, spinning up"
            );
            self.enter_spinup();
            self.apply(clamped.max(self.settings.spinup_pwm))
        } else {
            self.step_state(&output, dt, floor, clamped)
        }
    }

    fn step_state(&mut self, output: &ControllerOutput, dt: Duration, floor: u8, clamped: u8) -> Result<()> {
        match self.state {
            FanState::Spinup => {
                self.apply(clamped.max(self.settings.spinup_pwm))?;
                if self.spinup_timeout.tick(dt) {
                    self.transition(FanState::Running);
                }
            }
            FanState::Running => {
                self.apply(clamped)?;
                if output.max_error < 0.0 && clamped <= floor {
                    self.settle_timeout.reset();
                    self.transition(FanState::Settle);
                }
            }
            FanState::Settle => {
                if output.max_error > 0.0 || clamped > floor {
                    self.apply(clamped)?;
                    self.transition(FanState::Running);
                } else if self.settle_timeout.tick(dt) {
                    self.apply(pwm::STOPPED)?;
                    self.controller.reset_integrator();
                    self.settle_decay_timeout.reset();
                    self.transition(FanState::Stopped);
                } else {
                    self.apply(floor)?;
                }
            }
            FanState::Stopped => {
                self.controller.reset_integrator();
                if output.max_error > 0.0 {
                    let doubled = self
                        .settle_timeout
                        .limit()
                        .saturating_mul(2)
                        .min(self.settings.max_settle_time);
                    self.settle_timeout.set_limit(doubled);
                    debug!(settle_time = doubled.as_secs_f64(), "Settle time raised");
                    self.enter_spinup();
                    self.apply(clamped.max(self.settings.spinup_pwm))?;
                } else {
                    self.apply(pwm::STOPPED)?;
                    if output.max_derivative <= 0.0 && self.settle_decay_timeout.tick(dt) {
                        let halved = (self.settle_timeout.limit() / 2).max(self.settings.min_settle_time);
                        self.settle_timeout.set_limit(halved);
                        debug!(settle_time = halved.as_secs_f64(), "Settle time decayed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Write 255 regardless of state. Failures are logged, not returned.
    pub fn force_full_power(&mut self) {
        let _guard = self.span.enter();
        match self.hardware.write_pwm(pwm::MAX_VALUE) {
            Ok(()) => {
                self.last_pwm = Some(pwm::MAX_VALUE);
            }
            Err(e) => {
                error!(error = %e, "Failed to force full power");
                self.last_pwm = None;
            }
        }
    }

    pub fn status(&self) -> FanStatus {
        FanStatus {
            name: self.name.clone(),
            state: self.state,
            rpm: self.current_rpm,
            pwm: self.last_pwm,
            min_pwm: self.tracker.value(),
            probing: self.tracker.is_probing(),
            settle_time: self.settle_timeout.limit().as_secs_f64(),
            spinup_remaining: if self.state == FanState::Spinup {
                self.spinup_timeout.remaining().as_secs_f64()
            } else {
                0.0
            },
            controller: self.controller.status(),
            sensors: self.sensors.iter().map(|s| s.status()).collect(),
        }
    }

    fn read_rpm(&mut self) -> Result<Option<u32>> {
        let rpm = self.hardware.read_rpm()?;
        match self.settings.fan_max_rpm_sanity_check {
            Some(limit) if rpm > limit => {
                let glitch = QuietfanError::GlitchedReading {
                    source_name: self.name.clone(),
                    value: rpm,
                    limit,
                };
                warn!(error = %glitch, fallback = ?self.last_good_rpm, "Discarding RPM reading");
                Ok(self.last_good_rpm)
            }
            _ => {
                self.last_good_rpm = Some(rpm);
                Ok(Some(rpm))
            }
        }
    }

    fn apply(&mut self, value: u8) -> Result<()> {
        let value = if self.full_power { pwm::MAX_VALUE } else { value };
        if self.last_pwm == Some(value) {
            return Ok(());
        }
        if let Err(e) = self.hardware.write_pwm(value) {
            self.last_pwm = None;
            return Err(e);
        }
        trace!(pwm = value, "PWM written");
        self.last_pwm = Some(value);
        Ok(())
    }

    fn enter_spinup(&mut self) {
        self.spinup_timeout.reset();
        self.transition(FanState::Spinup);
    }

    fn transition(&mut self, next: FanState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Fan state changed");
            self.state = next;
        }
    }

    fn wakeup_hint(&self) -> Duration {
        match self.state {
            FanState::Spinup => self.settings.update_interval.min(self.spinup_timeout.remaining()),
            _ => self.settings.update_interval,
        }
    }
}

/// Round the raw command and clamp it into `[floor, 255]`
fn clamp_command(command: f64, floor: u8) -> u8 {
    if command.is_nan() {
        return pwm::MAX_VALUE;
    }
    clamp(command.round(), f64::from(floor), f64::from(pwm::MAX_VALUE)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{StaticSensor, StaticSensorHandle, TemperatureLimits};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    const DT: Duration = Duration::from_secs(30);

    #[derive(Default)]
    struct FakeState {
        rpm: VecDeque<u32>,
        default_rpm: u32,
        writes: Vec<u8>,
        fail_writes: bool,
    }

    #[derive(Clone, Default)]
    struct FakeFan(Arc<Mutex<FakeState>>);

    impl FakeFan {
        fn spinning() -> Self {
            let fan = Self::default();
            fan.0.lock().default_rpm = 1000;
            fan
        }

        fn queue_rpm(&self, values: &[u32]) {
            self.0.lock().rpm.extend(values);
        }

        fn writes(&self) -> Vec<u8> {
            self.0.lock().writes.clone()
        }
    }

    impl FanHardware for FakeFan {
        fn describe(&self) -> String {
            "fake".to_string()
        }

        fn read_rpm(&mut self) -> Result<u32> {
            let mut state = self.0.lock();
            let default = state.default_rpm;
            Ok(state.rpm.pop_front().unwrap_or(default))
        }

        fn write_pwm(&mut self, value: u8) -> Result<()> {
            let mut state = self.0.lock();
            if state.fail_writes {
                return Err(QuietfanError::PwmWrite {
                    path: "fake".into(),
                    reason: "injected".to_string(),
                });
            }
            state.writes.push(value);
            Ok(())
        }
    }

    fn engine_with(settings: FanSettings) -> (FanEngine, FakeFan, StaticSensorHandle) {
        let fan = FakeFan::spinning();
        let (sensor, handle) = StaticSensor::new("cpu", TemperatureLimits::new(40.0, 10.0));
        let engine = FanEngine::new("test", settings, Box::new(fan.clone()), vec![Box::new(sensor)])
            .unwrap();
        (engine, fan, handle)
    }

    fn p_only() -> FanSettings {
        FanSettings::default().with_gains(PidGains::new(20.0, 0.0, 0.0))
    }

    #[test]
    fn test_starts_in_spinup_at_spinup_pwm() {
        let (mut engine, fan, handle) = engine_with(p_only());
        assert_eq!(engine.state(), FanState::Spinup);
        handle.set(Some(30.0));

        let (hint, status) = engine.update(Duration::ZERO).unwrap();
        assert_eq!(status.state, FanState::Spinup);
        assert_eq!(fan.writes(), vec![128]);
        // Hint is bounded by the remaining spin-up time
        assert_eq!(hint, Duration::from_secs(1));
        assert!(status.spinup_remaining > 0.0);
    }

    #[test]
    fn test_cool_fan_settles_then_stops() {
        let (mut engine, fan, handle) = engine_with(p_only());
        handle.set(Some(45.0));
        engine.update(DT).unwrap();
        assert_eq!(engine.state(), FanState::Running);
        engine.update(DT).unwrap();
        assert_eq!(engine.state(), FanState::Running);

        handle.set(Some(35.0));
        engine.update(DT).unwrap();
        assert_eq!(engine.state(), FanState::Settle);

        for _ in 0..3 {
            engine.update(DT).unwrap();
            assert_eq!(engine.state(), FanState::Settle);
            assert_eq!(engine.last_pwm(), Some(engine.min_pwm()));
        }
        engine.update(DT).unwrap();
        assert_eq!(engine.state(), FanState::Stopped);
        assert_eq!(engine.last_pwm(), Some(0));
        assert_eq!(fan.writes().last(), Some(&0));
        assert_eq!(engine.controller().integrator(), 0.0);
    }

    #[test]
    fn test_writes_are_deduplicated() {
        let (mut engine, fan, handle) = engine_with(p_only().with_min_pwm(1));
        handle.set(Some(50.0));
        for _ in 0..5 {
            engine.update(DT).unwrap();
        }
        // 128 during spinup, then 20 (kp * 1.0) once
        assert_eq!(fan.writes(), vec![128, 20]);
    }

    #[test]
    fn test_stall_raises_floor_and_spins_up() {
        let settings = p_only().with_min_pwm(60).with_min_pwm_step(2);
        let (mut engine, fan, handle) = engine_with(settings);
        handle.set(Some(45.0));
        engine.update(DT).unwrap();
        engine.update(DT).unwrap();
        assert_eq!(engine.state(), FanState::Running);
        let floor = engine.min_pwm();

        fan.queue_rpm(&[0]);
        let (_, status) = engine.update(DT).unwrap();
        // Probing lowered the floor by one step this tick, the stall raised it by one
        assert_eq!(status.min_pwm, floor);
        assert!(!status.probing);
        assert_eq!(status.state, FanState::Spinup);
        assert_eq!(status.pwm, Some(128));
    }

    #[test]
    fn test_zero_rpm_while_spinning_up_is_not_a_stall() {
        let (mut engine, fan, handle) = engine_with(p_only());
        handle.set(Some(45.0));
        fan.queue_rpm(&[0]);
        engine.update(Duration::ZERO).unwrap();
        assert_eq!(engine.state(), FanState::Spinup);
        assert!(engine.status().probing);
    }

    #[test]
    fn test_glitch_uses_last_good_rpm() {
        let settings = p_only().with_rpm_sanity_check(3000);
        let (mut engine, fan, handle) = engine_with(settings);
        handle.set(Some(45.0));
        fan.queue_rpm(&[1200, 1100, 9999, 1150]);

        let rpms: Vec<Option<u32>> = (0..4)
            .map(|_| engine.update(DT).unwrap().1.rpm)
            .collect();
        assert_eq!(rpms, vec![Some(1200), Some(1100), Some(1100), Some(1150)]);
        assert_eq!(engine.state(), FanState::Running);
    }

    #[test]
    fn test_glitch_without_history_skips_stall_check() {
        let settings = p_only().with_rpm_sanity_check(3000);
        let (mut engine, fan, handle) = engine_with(settings);
        handle.set(Some(45.0));
        fan.queue_rpm(&[9999]);
        let (_, status) = engine.update(DT).unwrap();
        assert_eq!(status.rpm, None);
    }

    #[test]
    fn test_restart_doubles_settle_time() {
        let (mut engine, _fan, handle) = engine_with(p_only());
        handle.set(Some(35.0));
        // spinup -> running -> settle -> (4 ticks) stopped
        for _ in 0..6 {
            engine.update(DT).unwrap();
        }
        assert_eq!(engine.state(), FanState::Stopped);
        assert_eq!(engine.settle_limit(), Duration::from_secs(120));

        handle.set(Some(45.0));
        engine.update(DT).unwrap();
        assert_eq!(engine.state(), FanState::Spinup);
        assert_eq!(engine.settle_limit(), Duration::from_secs(240));
        assert_eq!(engine.last_pwm(), Some(128));
    }

    #[test]
    fn test_settle_time_decays_while_stopped() {
        let settings = p_only().with_settle_times(
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        let (mut engine, _fan, handle) = engine_with(settings);
        handle.set(Some(35.0));
        while engine.state() != FanState::Stopped {
            engine.update(DT).unwrap();
        }
        // Two restarts: 60 -> 120 -> 240
        for _ in 0..2 {
            handle.set(Some(45.0));
            engine.update(DT).unwrap();
            handle.set(Some(35.0));
            while engine.state() != FanState::Stopped {
                engine.update(DT).unwrap();
            }
        }
        assert_eq!(engine.settle_limit(), Duration::from_secs(240));

        // Decay timer fires every second tick
        engine.update(DT).unwrap();
        engine.update(DT).unwrap();
        assert_eq!(engine.settle_limit(), Duration::from_secs(120));
        for _ in 0..10 {
            engine.update(DT).unwrap();
        }
        assert_eq!(engine.settle_limit(), Duration::from_secs(60));
        assert_eq!(engine.last_pwm(), Some(0));
    }

    #[test]
    fn test_force_full_power() {
        let (mut engine, fan, _handle) = engine_with(p_only());
        engine.force_full_power();
        assert_eq!(engine.last_pwm(), Some(255));

        fan.0.lock().fail_writes = true;
        engine.force_full_power();
        assert_eq!(engine.last_pwm(), None);
    }

    #[test]
    fn test_write_failure_propagates() {
        let (mut engine, fan, handle) = engine_with(p_only());
        handle.set(Some(45.0));
        fan.0.lock().fail_writes = true;
        assert!(matches!(engine.update(DT), Err(QuietfanError::PwmWrite { .. })));
        assert_eq!(engine.last_pwm(), None);
    }

    #[test]
    fn test_duplicate_sensor_names_rejected() {
        let (a, _) = StaticSensor::new("disk", TemperatureLimits::new(40.0, 5.0));
        let (b, _) = StaticSensor::new("disk", TemperatureLimits::new(40.0, 5.0));
        let result = FanEngine::new(
            "case",
            FanSettings::default(),
            Box::new(FakeFan::spinning()),
            vec![Box::new(a), Box::new(b)],
        );
        match result {
            Err(QuietfanError::DuplicateName { kind, names }) => {
                assert_eq!(kind, "sensor");
                assert_eq!(names, vec!["disk".to_string()]);
            }
            _ => panic!("expected duplicate name error"),
        }
    }

    #[test]
    fn test_clamp_command() {
        assert_eq!(clamp_command(-50.0, 80), 80);
        assert_eq!(clamp_command(100.4, 80), 100);
        assert_eq!(clamp_command(1000.0, 80), 255);
        assert_eq!(clamp_command(f64::NAN, 80), 255);
    }
}
