//! Interaction signal sources.
//!
//! The scheduler does not care how interactions are detected. Anything that
//! can produce a stream of [`InteractionKind`]s implements
//! [`InteractionSource`] and is attached with
//! [`SchedulerHandle::attach`](crate::runtime::SchedulerHandle::attach).

use async_trait::async_trait;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::trace;
use tracing::warn;

use crate::interaction::InteractionKind;

/// Trait for interaction event sources.
#[async_trait]
pub trait InteractionSource: Send {
    /// Wait for the next interaction. `None` means the source is exhausted.
    async fn next_interaction(&mut self) -> Option<InteractionKind>;
}

/// Source fed through a tokio channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<InteractionKind>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<InteractionKind>) -> Self {
        Self { rx }
    }

    /// Create a bounded channel and the source reading from it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<InteractionKind>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl InteractionSource for ChannelSource {
    async fn next_interaction(&mut self) -> Option<InteractionKind> {
        self.rx.recv().await
    }
}

/// Source reading one interaction tag per line (e.g. a pipe or socket).
///
/// Unknown tags are skipped with a warning.
pub struct LineSource<R> {
    reader: R,
    line: String,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R> InteractionSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_interaction(&mut self) -> Option<InteractionKind> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line).await {
                Ok(0) => return None,
                Ok(_) => {
                    let tag = self.line.trim();
                    if tag.is_empty() {
                        continue;
                    }
                    trace!("Received line: {}", tag);
                    match tag.parse() {
                        Ok(kind) => return Some(kind),
                        Err(e) => warn!("{}", e),
                    }
                }
                Err(e) => {
                    warn!("Read error: {}", e);
                    return None;
                }
            }
        }
    }
}
