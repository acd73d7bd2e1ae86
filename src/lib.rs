//! quiet-window - interaction-aware idle callback scheduler.
//!
//! Defers low-priority callbacks until no continuous user interaction
//! (pointer movement, scrolling, key or touch activity) has been observed
//! for a configurable quiet period.

pub mod clock;
pub mod config;
pub mod deadline;
pub mod interaction;
pub mod queue;
pub mod replay;
pub mod runtime;
pub mod scheduler;
pub mod source;
pub mod timer;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::Config;
pub use deadline::Deadline;
pub use interaction::{InteractionKind, InteractionMonitor, InteractionSet};
pub use queue::CallbackId;
pub use runtime::{IdleRuntime, SchedulerError, SchedulerHandle};
pub use scheduler::{Dispatch, IdleScheduler, IdleState, SchedulerStats, SchedulerStatus};
pub use source::{ChannelSource, InteractionSource, LineSource};
