//! Fan registry: owns every fan engine and runs one control tick at a time
//!
//! # Failsafes
//!
//! - Any error while updating a fan forces every fan to full power before
//!   the error is returned to the caller.
//! - Any sensor at or above its critical temperature forces every fan to
//!   full power for that tick.

use std::collections::HashSet;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use qf_error::{QuietfanError, Result};
use qf_protocol::StatusSnapshot;
use tracing::{debug, error, info, info_span, Span};

use super::fan::FanEngine;
use crate::history::History;
use crate::status::StatusHandle;

pub struct FanRegistry {
    fans: Vec<FanEngine>,
    update_interval: Duration,
    status: StatusHandle,
    history: Option<History>,
    last_tick: Option<Instant>,
    failsafe_active: bool,
    span: Span,
}

impl FanRegistry {
    pub fn new(fans: Vec<FanEngine>, update_interval: Duration) -> Result<Self> {
        if fans.is_empty() {
            return Err(QuietfanError::invalid_config("fans", "at least one fan is required"));
        }

        let mut duplicates = Vec::new();
        {
            let mut seen = HashSet::new();
            for fan in &fans {
                if !seen.insert(fan.name()) {
                    duplicates.push(fan.name().to_string());
                }
            }
        }
        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            return Err(QuietfanError::DuplicateName {
                kind: "fan",
                names: duplicates,
            });
        }

        let span = info_span!("registry", fans = fans.len());
        Ok(Self {
            fans,
            update_interval,
            status: StatusHandle::new(),
            history: None,
            last_tick: None,
            failsafe_active: false,
            span,
        })
    }

    /// Publish snapshots through an existing handle
    pub fn with_status_handle(mut self, status: StatusHandle) -> Self {
        self.status = status;
        self
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    pub fn fans(&self) -> &[FanEngine] {
        &self.fans
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn failsafe_active(&self) -> bool {
        self.failsafe_active
    }

    /// Switch every fan to manual PWM control
    pub fn enable_manual_control(&mut self) -> Result<()> {
        for fan in self.fans.iter_mut() {
            fan.enable_manual()?;
        }
        Ok(())
    }

    /// Run one tick, measuring the time since the previous one.
    ///
    /// Returns the time until the next tick is due.
    pub fn tick(&mut self) -> Result<Duration> {
        let now = Instant::now();
        let dt = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);
        self.tick_with(dt)
    }

    /// Run one tick with an explicit time step.
    ///
    /// Every fan is sampled before any fan is written, so the critical
    /// temperature check sees this tick's readings and a failsafe tick
    /// writes nothing but 255.
    pub fn tick_with(&mut self, dt: Duration) -> Result<Duration> {
        let span = self.span.clone();
        let _guard = span.enter();

        for i in 0..self.fans.len() {
            if let Err(e) = self.fans[i].sample(dt) {
                return Err(self.fail(i, e));
            }
        }

        let critical = self.critical_sensors();
        let failsafe = !critical.is_empty();
        if failsafe && !self.failsafe_active {
            error!(sensors = ?critical, "Critical temperature reached, forcing full power");
        } else if !failsafe && self.failsafe_active {
            info!("All sensors below critical temperature again");
        }
        self.failsafe_active = failsafe;

        let mut next_update = self.update_interval;
        let mut statuses = Vec::with_capacity(self.fans.len());
        for i in 0..self.fans.len() {
            match self.fans[i].actuate(dt, failsafe) {
                Ok((hint, status)) => {
                    next_update = next_update.min(hint);
                    statuses.push(status);
                }
                Err(e) => return Err(self.fail(i, e)),
            }
        }

        let snapshot = StatusSnapshot {
            timestamp_ms: unix_millis(),
            dt: dt.as_secs_f64(),
            next_update: next_update.as_secs_f64(),
            failsafe_active: self.failsafe_active,
            fans: statuses,
        };
        let snapshot = self.status.publish(snapshot);
        if let Some(history) = &self.history {
            history.push(snapshot);
        }

        debug!(dt = dt.as_secs_f64(), next_update = next_update.as_secs_f64(), "Tick complete");
        Ok(next_update)
    }

    fn fail(&mut self, index: usize, e: QuietfanError) -> QuietfanError {
        error!(fan = %self.fans[index].name(), error = %e, "Fan update failed, forcing full power");
        self.force_full_power();
        e
    }

    /// Write full power to every fan, best effort
    pub fn force_full_power(&mut self) {
        for fan in self.fans.iter_mut() {
            fan.force_full_power();
        }
    }

    /// `fan/sensor` names of sensors at or above their critical temperature
    fn critical_sensors(&self) -> Vec<String> {
        self.fans
            .iter()
            .flat_map(|fan| {
                fan.sensors()
                    .iter()
                    .filter(|s| s.is_critical())
                    .map(move |s| format!("{}/{}", fan.name(), s.name()))
            })
            .collect()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fan::FanSettings;
    use qf_protocol::FanState;
    use crate::hw::{FanHardware, StaticSensor, StaticSensorHandle, TemperatureLimits};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const DT: Duration = Duration::from_secs(30);

    #[derive(Clone, Default)]
    struct RecordingFan {
        writes: Arc<Mutex<Vec<u8>>>,
        fail_reads: Arc<Mutex<bool>>,
    }

    impl FanHardware for RecordingFan {
        fn describe(&self) -> String {
            "recording".to_string()
        }

        fn read_rpm(&mut self) -> Result<u32> {
            if *self.fail_reads.lock() {
                return Err(QuietfanError::FanRead {
                    path: "recording".into(),
                    reason: "injected".to_string(),
                });
            }
            Ok(900)
        }

        fn write_pwm(&mut self, value: u8) -> Result<()> {
            self.writes.lock().push(value);
            Ok(())
        }
    }

    fn fan(name: &str, critical: Option<f32>) -> (FanEngine, RecordingFan, StaticSensorHandle) {
        let hw = RecordingFan::default();
        let mut limits = TemperatureLimits::new(40.0, 10.0);
        limits.critical_temperature = critical;
        let (sensor, handle) = StaticSensor::new(format!("{name}-temp"), limits);
        let engine = FanEngine::new(name, FanSettings::default(), Box::new(hw.clone()), vec![Box::new(sensor)])
            .unwrap();
        (engine, hw, handle)
    }

    #[test]
    fn test_rejects_empty_and_duplicate_fans() {
        assert!(matches!(
            FanRegistry::new(Vec::new(), DT),
            Err(QuietfanError::InvalidConfig { .. })
        ));

        let (a, _, _) = fan("case", None);
        let (b, _, _) = fan("case", None);
        match FanRegistry::new(vec![a, b], DT) {
            Err(QuietfanError::DuplicateName { kind, names }) => {
                assert_eq!(kind, "fan");
                assert_eq!(names, vec!["case".to_string()]);
            }
            _ => panic!("expected duplicate fan error"),
        }
    }

    #[test]
    fn test_tick_publishes_snapshot() {
        let (a, _, ha) = fan("case", None);
        let (b, _, hb) = fan("cpu", None);
        ha.set(Some(45.0));
        hb.set(Some(30.0));
        let history = History::with_capacity(2);
        let mut registry = FanRegistry::new(vec![a, b], DT)
            .unwrap()
            .with_history(history.clone());
        let status = registry.status_handle();
        assert!(status.latest().is_none());

        // First tick: both fans spinning up, hint bounded by spin-up time
        let next = registry.tick_with(Duration::ZERO).unwrap();
        assert_eq!(next, Duration::from_secs(1));

        let next = registry.tick_with(DT).unwrap();
        assert_eq!(next, DT);

        let snapshot = status.latest().unwrap();
        assert_eq!(snapshot.fans.len(), 2);
        assert!(!snapshot.failsafe_active);
        assert_eq!(snapshot.fan("cpu").unwrap().sensors[0].temperature, Some(30.0));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_error_forces_full_power() {
        let (a, hw_a, ha) = fan("case", None);
        let (b, hw_b, hb) = fan("cpu", None);
        ha.set(Some(30.0));
        hb.set(Some(30.0));
        let mut registry = FanRegistry::new(vec![a, b], DT).unwrap();
        registry.tick_with(DT).unwrap();

        *hw_b.fail_reads.lock() = true;
        assert!(registry.tick_with(DT).is_err());
        assert_eq!(hw_a.writes.lock().last(), Some(&255));
        assert_eq!(hw_b.writes.lock().last(), Some(&255));
    }

    #[test]
    fn test_critical_temperature_failsafe() {
        let (a, hw_a, ha) = fan("case", Some(70.0));
        let (b, hw_b, hb) = fan("cpu", None);
        ha.set(Some(30.0));
        hb.set(Some(30.0));
        let mut registry = FanRegistry::new(vec![a, b], DT).unwrap();
        registry.tick_with(DT).unwrap();
        assert!(!registry.failsafe_active());

        ha.set(Some(75.0));
        registry.tick_with(DT).unwrap();
        assert!(registry.failsafe_active());
        assert_eq!(hw_a.writes.lock().last(), Some(&255));
        assert_eq!(hw_b.writes.lock().last(), Some(&255));
        let snapshot = registry.status_handle().latest().unwrap();
        assert!(snapshot.failsafe_active);
        assert!(snapshot.fans.iter().all(|f| f.pwm == Some(255)));

        ha.set(Some(30.0));
        registry.tick_with(DT).unwrap();
        assert!(!registry.failsafe_active());
        assert_ne!(hw_b.writes.lock().last(), Some(&255));
    }

    #[test]
    fn test_failsafe_never_writes_zero_to_stopped_fan() {
        let (a, _, ha) = fan("case", Some(70.0));
        let (b, hw_b, hb) = fan("drives", None);
        ha.set(Some(30.0));
        hb.set(Some(30.0));
        let mut registry = FanRegistry::new(vec![a, b], DT).unwrap();
        while registry.fans()[1].state() != FanState::Stopped {
            registry.tick_with(DT).unwrap();
        }
        let before = hw_b.writes.lock().len();
        assert_eq!(hw_b.writes.lock().last(), Some(&0));

        ha.set(Some(80.0));
        for _ in 0..3 {
            registry.tick_with(DT).unwrap();
            assert!(registry.failsafe_active());
            assert_eq!(registry.fans()[1].last_pwm(), Some(255));
        }
        assert_eq!(hw_b.writes.lock()[before..].to_vec(), vec![255u8]);

        // Leaving the failsafe lets the stopped fan rest again
        ha.set(Some(30.0));
        registry.tick_with(DT).unwrap();
        assert!(!registry.failsafe_active());
        assert_eq!(registry.fans()[1].state(), FanState::Stopped);
        assert_eq!(hw_b.writes.lock().last(), Some(&0));
    }
}
