use std::time::Duration;

use tokio::time::Instant;

/// How often the idle loop re-reads the configured interval.
pub const INTERVAL_POLL: Duration = Duration::from_secs(5);

/// Next-due bookkeeping for the periodic cycle.
///
/// The period may change between cycles; a change moves the next tick to
/// `now + period` instead of keeping the old phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    period: Duration,
    next_due: Instant,
}

impl Schedule {
    /// Schedule whose first tick is one period from `now`.
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: after(now, period),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Apply a freshly read interval. Returns true if it differed and the
    /// schedule moved.
    pub fn observe_interval(&mut self, period: Duration, now: Instant) -> bool {
        if period == self.period {
            return false;
        }
        tracing::info!(
            old_secs = self.period.as_secs_f64(),
            new_secs = period.as_secs_f64(),
            "Interval changed, rescheduling"
        );
        self.period = period;
        self.next_due = after(now, period);
        true
    }

    /// Move past a completed tick. Ticks missed while a cycle overran are
    /// skipped, not replayed.
    pub fn advance(&mut self, now: Instant) {
        self.next_due = after(self.next_due, self.period);
        if self.next_due <= now {
            let behind = now.duration_since(self.next_due);
            let period_nanos = self.period.as_nanos().max(1);
            let missed = behind.as_nanos() / period_nanos + 1;
            tracing::warn!(missed = %missed, "Cycle overran its slot, skipping ticks");
            // next boundary of the old phase strictly after `now`
            let into_slot = u64::try_from(behind.as_nanos() % period_nanos).unwrap_or(u64::MAX);
            let remaining = self.period.saturating_sub(Duration::from_nanos(into_slot));
            self.next_due = after(now, remaining);
        }
    }
}

/// `at + period`, clamped to roughly 30 years out instead of overflowing.
fn after(at: Instant, period: Duration) -> Instant {
    at.checked_add(period)
        .unwrap_or_else(|| at + Duration::from_secs(86_400 * 365 * 30))
}
