//! Idle countdown state machine.
//!
//! A single re-armable countdown detects a contiguous quiet window:
//! - Interaction while unarmed arms the countdown for the full quiet period
//! - Interaction while armed leaves the countdown alone
//! - On expiry, the remaining quiet time is re-derived from the last
//!   interaction and the countdown is re-armed for exactly that remainder

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::deadline::Deadline;

/// Result of checking the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Unarmed, or the countdown has not elapsed yet.
    NotDue,
    /// Interaction happened while waiting; countdown moved to `fire_at`.
    Rearmed { fire_at: Instant },
    /// A full quiet period elapsed. The timer is now unarmed.
    IdleReached(Deadline),
}

/// Self-correcting idle countdown.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    /// Minimum gap between the last interaction and idle confirmation.
    quiet_period: Duration,

    /// When the pending countdown completes. `None` means free.
    fire_at: Option<Instant>,

    /// Budget reported to callbacks right now.
    estimate: Deadline,
}

impl IdleTimer {
    /// Create an unarmed timer.
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            fire_at: None,
            estimate: Deadline::idle(quiet_period),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Busy iff a countdown is pending.
    pub fn is_armed(&self) -> bool {
        self.fire_at.is_some()
    }

    /// When the pending countdown completes.
    pub fn fire_at(&self) -> Option<Instant> {
        self.fire_at
    }

    /// Budget reported to a callback that runs right now.
    pub fn current_deadline(&self) -> Deadline {
        self.estimate
    }

    /// React to an interaction observed at `now`.
    ///
    /// Returns true if this interaction armed the countdown.
    pub fn on_interaction(&mut self, now: Instant) -> bool {
        self.estimate = Deadline::exhausted();

        if self.fire_at.is_some() {
            return false;
        }

        let fire_at = now + self.quiet_period;
        debug!("Interaction started, idle countdown armed for {:?}", self.quiet_period);
        self.fire_at = Some(fire_at);
        true
    }

    /// Evaluate the countdown at `now` given the latest interaction time.
    pub fn on_expired(&mut self, now: Instant, last_interaction: Instant) -> Expiry {
        let Some(fire_at) = self.fire_at else {
            return Expiry::NotDue;
        };
        if now < fire_at {
            return Expiry::NotDue;
        }

        let expected_idle = last_interaction + self.quiet_period;
        if now < expected_idle {
            trace!(
                "Interaction during countdown, re-arming for {:?}",
                expected_idle - now
            );
            self.fire_at = Some(expected_idle);
            return Expiry::Rearmed {
                fire_at: expected_idle,
            };
        }

        debug!(
            "Quiet for {:?}, idle reached",
            now.saturating_duration_since(last_interaction)
        );
        self.fire_at = None;
        self.estimate = Deadline::idle(self.quiet_period);
        Expiry::IdleReached(self.estimate)
    }
}
