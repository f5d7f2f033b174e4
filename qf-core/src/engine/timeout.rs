//! Countdown timer and clamping helpers used by the fan state machine

use std::time::Duration;

/// Clamp `value` into `[low, high]`.
///
/// Unlike `f64::clamp` this never panics; if `low > high` the result is `low`.
#[inline]
pub fn clamp<T: PartialOrd>(value: T, low: T, high: T) -> T {
    if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }
}

/// Countdown that fires once every `limit` of accumulated time.
///
/// `tick` subtracts the elapsed time and reports `true` when the remaining
/// time reaches zero; the countdown then restarts from the limit. A limit of
/// 120s ticked in 30s steps fires on the fourth tick.
#[derive(Debug, Clone)]
pub struct Timeout {
    limit: Duration,
    remaining: Duration,
}

impl Timeout {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Restart the countdown from the current limit
    pub fn reset(&mut self) {
        self.remaining = self.limit;
    }

    /// Advance the countdown, returning true when it fired
    pub fn tick(&mut self, dt: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(dt);
        if self.remaining.is_zero() {
            self.remaining = self.limit;
            true
        } else {
            false
        }
    }

    /// Change the limit. The remaining time is capped at the new limit.
    pub fn set_limit(&mut self, limit: Duration) {
        self.limit = limit;
        self.remaining = self.remaining.min(limit);
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_secs(30);

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5, 1, 10), 5);
        assert_eq!(clamp(0, 1, 10), 1);
        assert_eq!(clamp(11, 1, 10), 10);
        assert_eq!(clamp(3.5, 1.0, 2.0), 2.0);
    }

    #[test]
    fn test_fires_on_fourth_tick() {
        let mut t = Timeout::new(Duration::from_secs(120));
        assert!(!t.tick(STEP));
        assert!(!t.tick(STEP));
        assert!(!t.tick(STEP));
        assert!(t.tick(STEP));
        // Auto-reset after firing
        assert_eq!(t.remaining(), Duration::from_secs(120));
    }

    #[test]
    fn test_fires_again_after_reset() {
        let mut t = Timeout::new(Duration::from_secs(60));
        assert!(!t.tick(STEP));
        t.reset();
        assert!(!t.tick(STEP));
        assert!(t.tick(STEP));
        assert!(!t.tick(STEP));
        assert!(t.tick(STEP));
    }

    #[test]
    fn test_large_step_fires_once() {
        let mut t = Timeout::new(Duration::from_secs(1));
        assert!(t.tick(STEP));
        assert!(t.tick(STEP));
    }

    #[test]
    fn test_zero_dt_never_fires() {
        let mut t = Timeout::new(Duration::from_secs(10));
        for _ in 0..100 {
            assert!(!t.tick(Duration::ZERO));
        }
    }

    #[test]
    fn test_set_limit_caps_remaining() {
        let mut t = Timeout::new(Duration::from_secs(240));
        t.set_limit(Duration::from_secs(120));
        assert_eq!(t.limit(), Duration::from_secs(120));
        assert_eq!(t.remaining(), Duration::from_secs(120));

        t.set_limit(Duration::from_secs(480));
        assert_eq!(t.remaining(), Duration::from_secs(120));
        t.reset();
        assert_eq!(t.remaining(), Duration::from_secs(480));
    }
}
