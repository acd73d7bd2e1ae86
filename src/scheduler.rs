//! Idle callback scheduler.
//!
//! Combines the interaction monitor, the idle countdown, and the callback
//! queue into one state machine with two states:
//! - Free: registrations run immediately with a full idle budget
//! - Busy: registrations queue until idle is reached (or their fallback
//!   delay expires) and then run in registration order
//!
//! The scheduler does no waiting itself. A driver calls [`IdleScheduler::poll_timers`]
//! at or after [`IdleScheduler::next_wakeup`].

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::clock::Clock;
use crate::clock::TokioClock;
use crate::config::Config;
use crate::deadline::Deadline;
use crate::interaction::InteractionKind;
use crate::interaction::InteractionMonitor;
use crate::interaction::InteractionSet;
use crate::queue::CallbackId;
use crate::queue::CallbackQueue;
use crate::queue::IdleCallback;
use crate::queue::PendingCallback;
use crate::timer::Expiry;
use crate::timer::IdleTimer;

/// Whether the user is currently interacting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    /// Idle countdown pending.
    Busy,
    /// No countdown pending.
    Free,
}

/// How a registration was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The callback already ran.
    Immediate(CallbackId),
    /// The callback is waiting for idle.
    Queued(CallbackId),
}

impl Dispatch {
    pub fn id(self) -> CallbackId {
        match self {
            Self::Immediate(id) | Self::Queued(id) => id,
        }
    }
}

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub interactions: u64,
    pub idle_transitions: u64,
    pub rearms: u64,
    pub immediate: u64,
    pub queued: u64,
    pub flushed: u64,
    pub fallback_fired: u64,
    pub cancelled: u64,
    pub drained: u64,
    pub panicked: u64,
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: IdleState,
    pub pending: usize,
    pub quiet_period_ms: u64,
    pub stats: SchedulerStats,
}

/// What a call to [`IdleScheduler::poll_timers`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerReport {
    /// Callbacks forced by their fallback delay.
    pub fallbacks_fired: usize,
    /// The countdown was pushed back by recent interaction.
    pub rearmed: bool,
    /// Idle was reached; number of callbacks flushed.
    pub flushed: Option<usize>,
}

/// Convert a caller-supplied fallback delay. Negative means no fallback.
pub fn normalize_fallback_ms(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().map(Duration::from_millis)
}

/// Interaction-aware idle callback scheduler.
pub struct IdleScheduler<C: Clock = TokioClock> {
    clock: C,
    monitor: InteractionMonitor,
    timer: IdleTimer,
    queue: CallbackQueue,
    default_fallback: Option<Duration>,
    next_id: u64,
    stats: SchedulerStats,
}

impl IdleScheduler<TokioClock> {
    /// Build from config using tokio's clock.
    pub fn from_config(config: &Config) -> Self {
        Self::with_clock(config, TokioClock)
    }
}

impl<C: Clock> IdleScheduler<C> {
    /// Create a scheduler tracking every interaction kind.
    pub fn new(quiet_period: Duration, clock: C) -> Self {
        let now = clock.now();
        Self {
            clock,
            monitor: InteractionMonitor::new(InteractionSet::all(), now),
            timer: IdleTimer::new(quiet_period),
            queue: CallbackQueue::new(),
            default_fallback: None,
            next_id: 1,
            stats: SchedulerStats::default(),
        }
    }

    /// Build from config with an explicit clock.
    pub fn with_clock(config: &Config, clock: C) -> Self {
        let mut scheduler = Self::new(config.quiet_period(), clock);
        let now = scheduler.clock.now();
        scheduler.monitor = InteractionMonitor::new(config.tracked(), now);
        scheduler.default_fallback = config.default_fallback();
        scheduler
    }

    pub fn quiet_period(&self) -> Duration {
        self.timer.quiet_period()
    }

    pub fn state(&self) -> IdleState {
        if self.timer.is_armed() {
            IdleState::Busy
        } else {
            IdleState::Free
        }
    }

    pub fn is_busy(&self) -> bool {
        self.timer.is_armed()
    }

    /// Number of callbacks waiting for idle.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Interaction kinds that count as activity.
    pub fn tracked(&self) -> InteractionSet {
        self.monitor.tracked()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            pending: self.pending(),
            quiet_period_ms: u64::try_from(self.quiet_period().as_millis()).unwrap_or(u64::MAX),
            stats: self.stats,
        }
    }

    /// Record an interaction happening now.
    pub fn notify(&mut self, kind: InteractionKind) -> bool {
        let now = self.clock.now();
        self.notify_at(kind, now)
    }

    /// Record an interaction observed at `at`.
    ///
    /// Returns false if the kind is not tracked.
    pub fn notify_at(&mut self, kind: InteractionKind, at: Instant) -> bool {
        if !self.monitor.notify(kind, at) {
            return false;
        }
        self.stats.interactions += 1;
        if self.timer.on_interaction(at) {
            trace!("Busy after {}", kind);
        }
        true
    }

    /// Register a callback to run once the user stops interacting.
    ///
    /// With a fallback delay, the callback runs no later than that delay
    /// even if interaction continues. Without one, the configured default
    /// fallback (if any) applies.
    pub fn schedule<F>(&mut self, callback: F, fallback: Option<Duration>) -> Dispatch
    where
        F: FnOnce(Deadline) + Send + 'static,
    {
        let id = CallbackId::new(self.next_id);
        self.next_id += 1;
        self.schedule_as(id, Box::new(callback), fallback)
    }

    /// Register a callback under an id allocated by the caller.
    pub(crate) fn schedule_as(
        &mut self,
        id: CallbackId,
        callback: IdleCallback,
        fallback: Option<Duration>,
    ) -> Dispatch {
        if !self.timer.is_armed() {
            trace!("Free, running {} immediately", id);
            let deadline = self.timer.current_deadline();
            self.stats.immediate += 1;
            self.invoke(id, callback, deadline);
            return Dispatch::Immediate(id);
        }

        let now = self.clock.now();
        let fallback = fallback.or(self.default_fallback);
        let entry = PendingCallback {
            callback,
            fallback_at: fallback.map(|delay| now + delay),
            registered_at: now,
        };

        if let Err(entry) = self.queue.push(id, entry) {
            warn!("Callback id {} already pending, running immediately", id);
            let deadline = self.timer.current_deadline();
            self.stats.immediate += 1;
            self.invoke(id, entry.callback, deadline);
            return Dispatch::Immediate(id);
        }

        self.stats.queued += 1;
        debug!(
            "Busy, queued {} (fallback {:?}, {} pending)",
            id,
            fallback,
            self.queue.len()
        );
        Dispatch::Queued(id)
    }

    /// Drop a pending callback. Returns false if it already ran or never existed.
    pub fn cancel(&mut self, id: CallbackId) -> bool {
        if self.queue.remove(id).is_some() {
            debug!("Cancelled {}", id);
            self.stats.cancelled += 1;
            true
        } else {
            trace!("Cancel for {} ignored, not pending", id);
            false
        }
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.timer.fire_at(), self.queue.next_fallback()) {
            (Some(idle), Some(fallback)) => Some(idle.min(fallback)),
            (idle, fallback) => idle.or(fallback),
        }
    }

    /// Fire expired fallback timers, then evaluate the idle countdown.
    pub fn poll_timers(&mut self) -> TimerReport {
        let now = self.clock.now();
        let mut report = TimerReport::default();

        let due = self.queue.take_due_fallbacks(now);
        if !due.is_empty() {
            let deadline = self.timer.current_deadline().timed_out();
            for (id, entry) in due {
                debug!(
                    "Fallback delay expired for {} after {:?}",
                    id,
                    now.saturating_duration_since(entry.registered_at)
                );
                self.stats.fallback_fired += 1;
                report.fallbacks_fired += 1;
                self.invoke(id, entry.callback, deadline);
            }
        }

        match self.timer.on_expired(now, self.monitor.last_interaction()) {
            Expiry::NotDue => {}
            Expiry::Rearmed { .. } => {
                self.stats.rearms += 1;
                report.rearmed = true;
            }
            Expiry::IdleReached(deadline) => {
                self.stats.idle_transitions += 1;
                report.flushed = Some(self.flush(now, deadline));
            }
        }

        report
    }

    /// Run every pending callback once with an exhausted budget.
    ///
    /// Used on shutdown so no registration is silently dropped.
    pub fn drain_all(&mut self) -> usize {
        let batch = self.queue.drain();
        let count = batch.len();
        if count > 0 {
            debug!("Draining {} pending callbacks", count);
        }
        for (id, entry) in batch {
            self.stats.drained += 1;
            self.invoke(id, entry.callback, Deadline::exhausted());
        }
        count
    }

    /// Run the whole queue in registration order with one shared deadline.
    fn flush(&mut self, now: Instant, deadline: Deadline) -> usize {
        let batch = self.queue.drain();
        let count = batch.len();
        if count > 0 {
            debug!("Idle reached, flushing {} callbacks", count);
        }
        for (id, entry) in batch {
            trace!(
                "Running {} after waiting {:?}",
                id,
                now.saturating_duration_since(entry.registered_at)
            );
            self.stats.flushed += 1;
            self.invoke(id, entry.callback, deadline);
        }
        count
    }

    /// Run one callback, containing any panic so the rest of a flush proceeds.
    fn invoke(&mut self, id: CallbackId, callback: IdleCallback, deadline: Deadline) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(deadline))) {
            self.stats.panicked += 1;
            error!(
                "Idle callback {} panicked: {}",
                id,
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
