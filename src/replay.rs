//! Script-driven replay of interactions and registrations.
//!
//! Each line is one command:
//! - `<tag>`: an interaction (`scroll`, `mousemove`, ...)
//! - `task <label> [fallback_ms]`: register a callback
//! - `cancel <label>`: cancel a pending callback
//! - `sleep <ms>`: wait
//! - `status`: report scheduler state
//!
//! Blank lines and lines starting with `#` are ignored.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::interaction::InteractionKind;
use crate::queue::CallbackId;
use crate::runtime::SchedulerError;
use crate::runtime::SchedulerHandle;
use crate::scheduler::SchedulerStatus;
use crate::scheduler::normalize_fallback_ms;

/// Errors while replaying a script.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayCommand {
    Interaction(InteractionKind),
    Task {
        label: String,
        fallback: Option<Duration>,
    },
    Cancel(String),
    Sleep(Duration),
    Status,
}

impl ReplayCommand {
    /// Parse a line. `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = parts.collect();

        let command = match (word, args.as_slice()) {
            ("task", [label]) => Self::Task {
                label: (*label).to_string(),
                fallback: None,
            },
            ("task", [label, fallback]) => {
                let ms: i64 = fallback
                    .parse()
                    .map_err(|_| format!("invalid fallback delay: {fallback}"))?;
                Self::Task {
                    label: (*label).to_string(),
                    fallback: normalize_fallback_ms(ms),
                }
            }
            ("task", _) => return Err("usage: task <label> [fallback_ms]".to_string()),
            ("cancel", [label]) => Self::Cancel((*label).to_string()),
            ("cancel", _) => return Err("usage: cancel <label>".to_string()),
            ("sleep", [ms]) => {
                let ms: u64 = ms.parse().map_err(|_| format!("invalid sleep: {ms}"))?;
                Self::Sleep(Duration::from_millis(ms))
            }
            ("sleep", _) => return Err("usage: sleep <ms>".to_string()),
            ("status", []) => Self::Status,
            (tag, []) => Self::Interaction(tag.parse().map_err(|e| format!("{e}"))?),
            (other, _) => return Err(format!("unknown command: {other}")),
        };

        Ok(Some(command))
    }
}

/// A task callback that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub label: String,
    /// Milliseconds since the replay started.
    pub elapsed_ms: u64,
    pub time_remaining_ms: u64,
    pub did_timeout: bool,
}

/// Drives a running scheduler from parsed commands.
pub struct Replay {
    handle: SchedulerHandle,
    started: Instant,
    records: mpsc::UnboundedSender<TaskRecord>,
    labels: HashMap<String, CallbackId>,
}

impl Replay {
    /// Create a replay. Task executions are delivered on the returned receiver,
    /// which closes once the replay and every registered task are gone.
    pub fn new(handle: SchedulerHandle) -> (Self, mpsc::UnboundedReceiver<TaskRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let replay = Self {
            handle,
            started: Instant::now(),
            records: tx,
            labels: HashMap::new(),
        };
        (replay, rx)
    }

    /// Apply one command. Returns the status for `status` commands.
    pub async fn apply(
        &mut self,
        command: ReplayCommand,
    ) -> Result<Option<SchedulerStatus>, ReplayError> {
        match command {
            ReplayCommand::Interaction(kind) => {
                self.handle.notify(kind)?;
            }
            ReplayCommand::Task { label, fallback } => {
                let records = self.records.clone();
                let started = self.started;
                let task_label = label.clone();
                let id = self.handle.schedule(
                    move |deadline| {
                        let elapsed = Instant::now().saturating_duration_since(started);
                        let _ = records.send(TaskRecord {
                            label: task_label,
                            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                            time_remaining_ms: deadline.time_remaining_ms(),
                            did_timeout: deadline.did_timeout(),
                        });
                    },
                    fallback,
                )?;
                debug!("Registered task '{}' as {}", label, id);
                self.labels.insert(label, id);
            }
            ReplayCommand::Cancel(label) => match self.labels.get(&label) {
                Some(id) => self.handle.cancel(*id)?,
                None => warn!("Cancel for unknown task '{}'", label),
            },
            ReplayCommand::Sleep(duration) => tokio::time::sleep(duration).await,
            ReplayCommand::Status => return Ok(Some(self.handle.status().await?)),
        }
        Ok(None)
    }

    /// Run a whole script. `on_status` receives each `status` result.
    ///
    /// Returns the number of commands applied.
    pub async fn run<R, F>(&mut self, reader: R, mut on_status: F) -> Result<usize, ReplayError>
    where
        R: AsyncBufRead + Unpin,
        F: FnMut(SchedulerStatus),
    {
        let mut lines = reader.lines();
        let mut line_no = 0;
        let mut applied = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let command = ReplayCommand::parse(&line).map_err(|message| ReplayError::Parse {
                line: line_no,
                message,
            })?;
            let Some(command) = command else {
                continue;
            };

            if let Some(status) = self.apply(command).await? {
                on_status(status);
            }
            applied += 1;
        }

        Ok(applied)
    }
}
