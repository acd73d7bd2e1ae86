//! Pending callback storage.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;

use crate::deadline::Deadline;

/// Boxed idle callback.
pub type IdleCallback = Box<dyn FnOnce(Deadline) + Send + 'static>;

/// Stable handle for a registration. Also used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A callback waiting for idle.
pub struct PendingCallback {
    pub callback: IdleCallback,

    /// When the fallback delay forces execution, if one was given.
    pub fallback_at: Option<Instant>,

    pub registered_at: Instant,
}

impl fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallback")
            .field("fallback_at", &self.fallback_at)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// FIFO queue of pending callbacks with an index of fallback timers.
///
/// Ids are allocated in increasing order, so iterating the map yields
/// registration order.
#[derive(Debug, Default)]
pub struct CallbackQueue {
    pending: BTreeMap<CallbackId, PendingCallback>,
    fallbacks: BTreeSet<(Instant, CallbackId)>,
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Add a callback. A duplicate id is rejected and the entry handed back.
    pub fn push(&mut self, id: CallbackId, entry: PendingCallback) -> Result<(), PendingCallback> {
        if self.pending.contains_key(&id) {
            return Err(entry);
        }
        if let Some(at) = entry.fallback_at {
            self.fallbacks.insert((at, id));
        }
        self.pending.insert(id, entry);
        Ok(())
    }

    /// Remove a callback and its fallback timer.
    pub fn remove(&mut self, id: CallbackId) -> Option<PendingCallback> {
        let entry = self.pending.remove(&id)?;
        if let Some(at) = entry.fallback_at {
            self.fallbacks.remove(&(at, id));
        }
        Some(entry)
    }

    /// Earliest pending fallback time.
    pub fn next_fallback(&self) -> Option<Instant> {
        self.fallbacks.first().map(|(at, _)| *at)
    }

    /// Remove every callback whose fallback time is at or before `now`,
    /// in fallback order (ties broken by registration order).
    pub fn take_due_fallbacks(&mut self, now: Instant) -> Vec<(CallbackId, PendingCallback)> {
        let mut due = Vec::new();
        while let Some(&(at, id)) = self.fallbacks.first() {
            if at > now {
                break;
            }
            self.fallbacks.pop_first();
            if let Some(entry) = self.pending.remove(&id) {
                due.push((id, entry));
            }
        }
        due
    }

    /// Remove every callback in registration order.
    pub fn drain(&mut self) -> Vec<(CallbackId, PendingCallback)> {
        self.fallbacks.clear();
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(registered_at: Instant, fallback_at: Option<Instant>) -> PendingCallback {
        PendingCallback {
            callback: Box::new(|_| {}),
            fallback_at,
            registered_at,
        }
    }

    fn ids(entries: &[(CallbackId, PendingCallback)]) -> Vec<u64> {
        entries.iter().map(|(id, _)| id.get()).collect()
    }

    #[test]
    fn test_drain_is_fifo() {
        let now = Instant::now();
        let mut queue = CallbackQueue::new();
        for i in 1..=3 {
            assert!(queue.push(CallbackId::new(i), entry(now, None)).is_ok());
        }

        assert_eq!(ids(&queue.drain()), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let now = Instant::now();
        let mut queue = CallbackQueue::new();
        assert!(queue.push(CallbackId::new(1), entry(now, None)).is_ok());
        assert!(queue.push(CallbackId::new(1), entry(now, None)).is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_clears_fallback() {
        let now = Instant::now();
        let at = now + Duration::from_millis(50);
        let mut queue = CallbackQueue::new();
        queue.push(CallbackId::new(7), entry(now, Some(at))).unwrap();
        assert_eq!(queue.next_fallback(), Some(at));

        assert!(queue.remove(CallbackId::new(7)).is_some());
        assert!(queue.remove(CallbackId::new(7)).is_none());
        assert_eq!(queue.next_fallback(), None);
    }

    #[test]
    fn test_take_due_fallbacks_in_time_order() {
        let now = Instant::now();
        let mut queue = CallbackQueue::new();
        queue.push(
            CallbackId::new(1),
            entry(now, Some(now + Duration::from_millis(80))),
        )
        .unwrap();
        queue.push(CallbackId::new(2), entry(now, None)).unwrap();
        queue.push(
            CallbackId::new(3),
            entry(now, Some(now + Duration::from_millis(20))),
        )
        .unwrap();

        assert!(queue.take_due_fallbacks(now).is_empty());

        let due = queue.take_due_fallbacks(now + Duration::from_millis(100));
        assert_eq!(ids(&due), vec![3, 1]);
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(CallbackId::new(2)).is_some());
        assert_eq!(queue.next_fallback(), None);
    }

    #[test]
    fn test_drain_clears_fallbacks() {
        let now = Instant::now();
        let mut queue = CallbackQueue::new();
        queue.push(
            CallbackId::new(1),
            entry(now, Some(now + Duration::from_millis(10))),
        )
        .unwrap();

        assert_eq!(queue.drain().len(), 1);
        assert!(queue.take_due_fallbacks(now + Duration::from_secs(1)).is_empty());
    }
}
