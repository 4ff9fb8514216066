//! Deadlines for the periodic tasks driven by the agent loop.

use std::time::{Duration, Instant};

/// Longest period any loop task may have.
pub const MAX_PERIOD: Duration = Duration::from_secs(86_400);

/// `now + period`, with `period` capped at [`MAX_PERIOD`].
pub fn after(now: Instant, period: Duration) -> Instant {
    now + period.min(MAX_PERIOD)
}

/// A task that becomes due once per `period`.
///
/// The loop hands every task the same `now`, so tasks never read the clock
/// themselves and can be driven deterministically in tests.
#[derive(Debug, Clone)]
pub struct Periodic {
    period: Duration,
    next_due: Instant,
    last_run: Option<Instant>,
}

impl Periodic {
    /// A task whose first run is due at `now`.
    pub fn immediate(period: Duration, now: Instant) -> Self {
        Self::starting_at(period, now)
    }

    /// A task whose first run is due one period after `now`.
    pub fn delayed(period: Duration, now: Instant) -> Self {
        Self::starting_at(period, after(now, period))
    }

    pub fn starting_at(period: Duration, first_due: Instant) -> Self {
        Self {
            period: period.min(MAX_PERIOD),
            next_due: first_due,
            last_run: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Returns `true` and schedules the next run if the task is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_run = Some(now);
        self.next_due = after(now, self.period);
        true
    }

    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Time left until the next run, zero if already due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}
