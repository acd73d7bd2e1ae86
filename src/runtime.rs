//! Tokio driver for the idle scheduler.
//!
//! One actor task owns the [`IdleScheduler`]; every mutation is serialized
//! through it. Interactions, registrations and cancellations share one
//! `mpsc` channel so the actor sees them in delivery order. The latest
//! interaction itself lives in a `watch` slot: only the first notification
//! after the actor consumed the slot enqueues a marker, so a burst costs one
//! message. A single pinned `Sleep` is reset only when the next wakeup
//! instant changes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::clock::TokioClock;
use crate::deadline::Deadline;
use crate::interaction::InteractionKind;
use crate::interaction::InteractionSet;
use crate::queue::CallbackId;
use crate::queue::IdleCallback;
use crate::scheduler::IdleScheduler;
use crate::scheduler::SchedulerStats;
use crate::scheduler::SchedulerStatus;
use crate::source::InteractionSource;

/// Errors from talking to the scheduler task.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler runtime stopped")]
    Closed,

    #[error("Scheduler task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy)]
struct Interaction {
    kind: InteractionKind,
    at: Instant,
}

enum Command {
    /// The interaction slot holds a value the actor has not applied.
    Interaction,
    Schedule {
        id: CallbackId,
        callback: IdleCallback,
        fallback: Option<Duration>,
    },
    Cancel(CallbackId),
    Status(oneshot::Sender<SchedulerStatus>),
}

/// Cloneable handle to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    interactions: Arc<watch::Sender<Option<Interaction>>>,
    /// Set while an `Interaction` marker is queued and not yet consumed.
    interaction_queued: Arc<AtomicBool>,
    tracked: InteractionSet,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    /// Report an interaction happening now.
    ///
    /// Cheap enough to call for every pointer move.
    pub fn notify(&self, kind: InteractionKind) -> Result<(), SchedulerError> {
        if self.shutdown.is_cancelled() || self.commands.is_closed() {
            return Err(SchedulerError::Closed);
        }
        if !self.tracked.contains(kind) {
            trace!("Ignoring untracked interaction: {}", kind);
            return Ok(());
        }

        self.interactions.send_replace(Some(Interaction {
            kind,
            at: Instant::now(),
        }));
        if !self.interaction_queued.swap(true, Ordering::SeqCst) {
            self.commands
                .send(Command::Interaction)
                .map_err(|_| SchedulerError::Closed)?;
        }
        Ok(())
    }

    /// Register a callback to run when the user is idle.
    ///
    /// The returned id can be passed to [`cancel`](Self::cancel).
    pub fn schedule<F>(
        &self,
        callback: F,
        fallback: Option<Duration>,
    ) -> Result<CallbackId, SchedulerError>
    where
        F: FnOnce(Deadline) + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::Closed);
        }

        let id = CallbackId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.commands
            .send(Command::Schedule {
                id,
                callback: Box::new(callback),
                fallback,
            })
            .map_err(|_| SchedulerError::Closed)?;
        Ok(id)
    }

    /// Drop a pending callback. No effect if it already ran.
    pub fn cancel(&self, id: CallbackId) -> Result<(), SchedulerError> {
        self.commands
            .send(Command::Cancel(id))
            .map_err(|_| SchedulerError::Closed)
    }

    /// Snapshot of the scheduler state.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Forward every interaction from `source` until it ends or the
    /// scheduler stops.
    pub fn attach<S>(&self, mut source: S) -> JoinHandle<()>
    where
        S: InteractionSource + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = handle.shutdown.cancelled() => break,
                    next = source.next_interaction() => {
                        let Some(kind) = next else {
                            debug!("Interaction source ended");
                            break;
                        };
                        if handle.notify(kind).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// A scheduler running on the current tokio runtime.
pub struct IdleRuntime {
    handle: SchedulerHandle,
    task: JoinHandle<SchedulerStats>,
}

impl IdleRuntime {
    /// Spawn the scheduler actor. Must be called inside a tokio runtime.
    pub fn start(scheduler: IdleScheduler<TokioClock>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (interactions_tx, interactions_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let interaction_queued = Arc::new(AtomicBool::new(false));

        let handle = SchedulerHandle {
            commands: commands_tx,
            interactions: Arc::new(interactions_tx),
            interaction_queued: interaction_queued.clone(),
            tracked: scheduler.tracked(),
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown: shutdown.clone(),
        };

        let inbox = Inbox {
            commands: commands_rx,
            interactions: interactions_rx,
            interaction_queued,
        };
        let task = tokio::spawn(run(scheduler, inbox, shutdown));

        Self { handle, task }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the actor. Callbacks still pending run once with an exhausted
    /// budget before this returns.
    pub async fn shutdown(self) -> Result<SchedulerStats, SchedulerError> {
        self.handle.shutdown.cancel();
        Ok(self.task.await?)
    }
}

/// Receiving side of a [`SchedulerHandle`].
struct Inbox {
    commands: mpsc::UnboundedReceiver<Command>,
    interactions: watch::Receiver<Option<Interaction>>,
    interaction_queued: Arc<AtomicBool>,
}

impl Inbox {
    fn handle(&mut self, scheduler: &mut IdleScheduler<TokioClock>, command: Command) {
        match command {
            Command::Interaction => {
                // Clear before reading so a notify racing with us queues a new marker.
                self.interaction_queued.store(false, Ordering::SeqCst);
                if !self.interactions.has_changed().unwrap_or(false) {
                    return;
                }
                let latest = *self.interactions.borrow_and_update();
                if let Some(interaction) = latest {
                    scheduler.notify_at(interaction.kind, interaction.at);
                }
            }
            Command::Schedule {
                id,
                callback,
                fallback,
            } => {
                scheduler.schedule_as(id, callback, fallback);
            }
            Command::Cancel(id) => {
                scheduler.cancel(id);
            }
            Command::Status(reply) => {
                let _ = reply.send(scheduler.status());
            }
        }
    }
}

/// Actor loop owning the scheduler.
async fn run(
    mut scheduler: IdleScheduler<TokioClock>,
    mut inbox: Inbox,
    shutdown: CancellationToken,
) -> SchedulerStats {
    info!(
        "Idle scheduler started, quiet period {:?}",
        scheduler.quiet_period()
    );

    let sleep = tokio::time::sleep_until(Instant::now());
    tokio::pin!(sleep);
    let mut wake_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            command = inbox.commands.recv() => {
                let Some(command) = command else {
                    debug!("All scheduler handles dropped");
                    break;
                };
                inbox.handle(&mut scheduler, command);
            }

            () = &mut sleep, if wake_at.is_some() => {
                wake_at = None;
                let report = scheduler.poll_timers();
                trace!(?report, "Timers polled");
            }
        }

        let next = scheduler.next_wakeup();
        if next != wake_at {
            if let Some(at) = next {
                sleep.as_mut().reset(at);
            }
            wake_at = next;
        }
    }

    // Registrations already sent must still run exactly once.
    inbox.commands.close();
    while let Ok(command) = inbox.commands.try_recv() {
        inbox.handle(&mut scheduler, command);
    }

    let drained = scheduler.drain_all();
    info!(
        "Idle scheduler stopped, drained {} pending callbacks",
        drained
    );
    scheduler.stats()
}
