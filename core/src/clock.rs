use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Source of wall-clock time for the admission engine.
///
/// Every engine component takes `now` as an argument; only the coordinator
/// reads the clock, once per call.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(ChronoDuration::milliseconds(millis));
    }

    /// Moves the clock to an arbitrary instant, including backwards.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Seconds elapsed from `earlier` to `later`, clamped at zero so a clock that
/// moved backwards never yields negative time.
pub fn elapsed_secs(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    if later <= earlier {
        return 0.0;
    }
    let micros = (later - earlier).num_microseconds().unwrap_or(i64::MAX);
    (micros.max(0) as f64) / 1_000_000.0
}

/// `at + by`, pinned to the latest representable instant on overflow.
pub(crate) fn saturating_add(at: DateTime<Utc>, by: ChronoDuration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - by`, pinned to the earliest representable instant on overflow.
pub(crate) fn saturating_sub(at: DateTime<Utc>, by: ChronoDuration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Whole seconds until `until`, rounded up and at least one.
pub fn secs_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let remaining = elapsed_secs(now, until);
    (remaining.ceil() as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_clamped_when_clock_moves_backwards() {
        let now = Utc::now();
        assert_eq!(elapsed_secs(now, now - ChronoDuration::seconds(5)), 0.0);
        assert_eq!(elapsed_secs(now, now + ChronoDuration::milliseconds(1500)), 1.5);
    }

    #[test]
    fn secs_until_rounds_up_and_never_returns_zero() {
        let now = Utc::now();
        assert_eq!(secs_until(now, now + ChronoDuration::milliseconds(1200)), 2);
        assert_eq!(secs_until(now, now), 1);
        assert_eq!(secs_until(now, now - ChronoDuration::seconds(3)), 1);
    }

    #[test]
    fn shifts_pin_at_the_representable_range() {
        let floor = DateTime::<Utc>::MIN_UTC;
        assert_eq!(saturating_sub(floor, ChronoDuration::seconds(60)), floor);
        let ceiling = DateTime::<Utc>::MAX_UTC;
        assert_eq!(saturating_add(ceiling, ChronoDuration::seconds(1)), ceiling);
        let now = Utc::now();
        assert_eq!(
            saturating_add(now, ChronoDuration::seconds(5)),
            now + ChronoDuration::seconds(5)
        );
        assert_eq!(elapsed_secs(ceiling, floor), 0.0);
    }

    #[test]
    fn manual_clock_advances_and_rewinds() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance_millis(250);
        assert_eq!(clock.now(), start + ChronoDuration::milliseconds(250));
        clock.set(start - ChronoDuration::seconds(1));
        assert_eq!(clock.now(), start - ChronoDuration::seconds(1));
    }
}
