//! Wall-clock seam. Production code reads local time; tests drive a
//! [`ManualClock`].

use std::fmt;
use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDateTime};

pub trait Clock: Send + Sync + fmt::Debug {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock. Optionally advances by `step` on every read, so code
/// that polls the clock sees time pass.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(NaiveDateTime, Duration)>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self::stepping(start, Duration::zero())
    }

    pub fn stepping(start: NaiveDateTime, step: Duration) -> Self {
        Self {
            state: Mutex::new((start, step)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.0 += by;
    }

    pub fn set(&self, at: NaiveDateTime) {
        self.lock().0 = at;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (NaiveDateTime, Duration)> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        let mut state = self.lock();
        let now = state.0;
        state.0 = now + state.1;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap()
    }

    #[test]
    fn manual_clock_is_frozen_until_advanced() {
        let clock = ManualClock::new(start());
        assert_eq!(clock.now(), start());
        assert_eq!(clock.now(), start());
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start() + Duration::seconds(30));
    }

    #[test]
    fn stepping_clock_moves_on_every_read() {
        let clock = ManualClock::stepping(start(), Duration::seconds(2));
        assert_eq!(clock.now(), start());
        assert_eq!(clock.now(), start() + Duration::seconds(2));
        assert_eq!(clock.now(), start() + Duration::seconds(4));
    }
}
