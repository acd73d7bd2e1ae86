//! Deadline handed to every executed callback.

use std::time::Duration;

/// Nominal idle budget for a callback.
///
/// This is an estimate, not a guarantee. Callbacks should treat
/// `time_remaining` as advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    time_remaining: Duration,
    did_timeout: bool,
}

impl Deadline {
    /// Budget reported once idle has been confirmed.
    pub fn idle(quiet_period: Duration) -> Self {
        Self {
            time_remaining: quiet_period,
            did_timeout: false,
        }
    }

    /// Budget reported while the user is interacting.
    pub fn exhausted() -> Self {
        Self {
            time_remaining: Duration::ZERO,
            did_timeout: false,
        }
    }

    /// Same budget, marked as forced by a fallback delay.
    #[must_use]
    pub fn timed_out(self) -> Self {
        Self {
            did_timeout: true,
            ..self
        }
    }

    pub fn time_remaining(&self) -> Duration {
        self.time_remaining
    }

    /// Remaining budget in whole milliseconds.
    pub fn time_remaining_ms(&self) -> u64 {
        u64::try_from(self.time_remaining.as_millis()).unwrap_or(u64::MAX)
    }

    /// True when the callback ran because its fallback delay expired.
    pub fn did_timeout(&self) -> bool {
        self.did_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_budgets() {
        let idle = Deadline::idle(Duration::from_millis(300));
        assert_eq!(idle.time_remaining_ms(), 300);
        assert!(!idle.did_timeout());

        let busy = Deadline::exhausted();
        assert_eq!(busy.time_remaining(), Duration::ZERO);

        let forced = busy.timed_out();
        assert!(forced.did_timeout());
        assert_eq!(forced.time_remaining(), Duration::ZERO);
    }
}
