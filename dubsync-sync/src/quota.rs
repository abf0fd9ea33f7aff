//! Wall-clock execution quota with coarse-grained clock reads.

use chrono::{Duration, NaiveDateTime};

use crate::clock::Clock;

/// Tracks elapsed time against a quota granted by the host.
///
/// [`Quota::tick`] reads the clock only once every `check_every` calls.
#[derive(Debug, Clone)]
pub struct Quota {
    started: NaiveDateTime,
    limit: Duration,
    check_every: usize,
    ticks: usize,
    exhausted: bool,
}

impl Quota {
    pub fn start(clock: &dyn Clock, limit: std::time::Duration, check_every: usize) -> Self {
        Self {
            started: clock.now(),
            limit: Duration::from_std(limit).unwrap_or_else(|_| Duration::days(36_500)),
            check_every: check_every.max(1),
            ticks: 0,
            exhausted: false,
        }
    }

    pub fn started(&self) -> NaiveDateTime {
        self.started
    }

    /// Count one unit of work; `true` once the quota is spent.
    pub fn tick(&mut self, clock: &dyn Clock) -> bool {
        if self.exhausted {
            return true;
        }
        self.ticks += 1;
        if self.ticks % self.check_every == 0 {
            return self.check(clock);
        }
        false
    }

    /// Read the clock now.
    pub fn check(&mut self, clock: &dyn Clock) -> bool {
        if !self.exhausted {
            self.exhausted = clock.now().signed_duration_since(self.started) >= self.limit;
        }
        self.exhausted
    }
}
