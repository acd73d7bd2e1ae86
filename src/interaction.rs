//! Interaction tracking.
//!
//! Records the time of the most recent continuous user interaction
//! (pointer movement, scrolling, key or touch activity).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

/// Continuous-interaction event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    PointerDown,
    PointerMove,
    TouchStart,
    TouchMove,
    KeyDown,
    Scroll,
    MouseMove,
}

impl InteractionKind {
    /// Every known kind, in tag order.
    pub const ALL: [Self; 7] = [
        Self::PointerDown,
        Self::PointerMove,
        Self::TouchStart,
        Self::TouchMove,
        Self::KeyDown,
        Self::Scroll,
        Self::MouseMove,
    ];

    /// Event tag as delivered by the host.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PointerDown => "pointerdown",
            Self::PointerMove => "pointermove",
            Self::TouchStart => "touchstart",
            Self::TouchMove => "touchmove",
            Self::KeyDown => "keydown",
            Self::Scroll => "scroll",
            Self::MouseMove => "mousemove",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown interaction tag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown interaction tag: {0}")]
pub struct ParseInteractionError(pub String);

impl FromStr for InteractionKind {
    type Err = ParseInteractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ParseInteractionError(tag.to_string()))
    }
}

/// Set of interaction kinds that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionSet(u8);

impl InteractionSet {
    /// No kinds tracked.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// All known kinds tracked.
    pub fn all() -> Self {
        InteractionKind::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, kind: InteractionKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(self, kind: InteractionKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for InteractionSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<InteractionKind> for InteractionSet {
    fn from_iter<I: IntoIterator<Item = InteractionKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// Tracks when the user last interacted.
#[derive(Debug, Clone)]
pub struct InteractionMonitor {
    /// Kinds that update the monitor.
    tracked: InteractionSet,

    /// Most recent interaction (or creation time if none yet).
    last_interaction: Instant,

    /// Kind of the most recent interaction.
    last_kind: Option<InteractionKind>,

    /// Count of recorded interactions.
    observed: u64,
}

impl InteractionMonitor {
    /// Create a monitor whose last interaction is `now`.
    pub fn new(tracked: InteractionSet, now: Instant) -> Self {
        Self {
            tracked,
            last_interaction: now,
            last_kind: None,
            observed: 0,
        }
    }

    pub fn tracked(&self) -> InteractionSet {
        self.tracked
    }

    /// Whether `kind` counts as activity.
    pub fn tracks(&self, kind: InteractionKind) -> bool {
        self.tracked.contains(kind)
    }

    /// Record an interaction observed at `at`.
    ///
    /// Returns false if the kind is not tracked. Older timestamps never
    /// move `last_interaction` backwards.
    pub fn notify(&mut self, kind: InteractionKind, at: Instant) -> bool {
        if !self.tracks(kind) {
            trace!("Ignoring untracked interaction: {}", kind);
            return false;
        }

        if at > self.last_interaction {
            self.last_interaction = at;
        }
        self.last_kind = Some(kind);
        self.observed += 1;
        true
    }

    pub fn last_interaction(&self) -> Instant {
        self.last_interaction
    }

    pub fn last_kind(&self) -> Option<InteractionKind> {
        self.last_kind
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Time elapsed since the last interaction, zero if `now` is earlier.
    pub fn time_since_last_interaction(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_interaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interaction_tags() {
        assert_eq!(
            "scroll".parse::<InteractionKind>(),
            Ok(InteractionKind::Scroll)
        );
        assert_eq!(
            " PointerMove ".parse::<InteractionKind>(),
            Ok(InteractionKind::PointerMove)
        );
        assert_eq!(
            "click".parse::<InteractionKind>(),
            Err(ParseInteractionError("click".to_string()))
        );
    }

    #[test]
    fn test_tags_round_trip_through_display() {
        for kind in InteractionKind::ALL {
            assert_eq!(kind.to_string().parse::<InteractionKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_interaction_set() {
        let set: InteractionSet = [InteractionKind::Scroll, InteractionKind::KeyDown]
            .into_iter()
            .collect();
        assert!(set.contains(InteractionKind::Scroll));
        assert!(set.contains(InteractionKind::KeyDown));
        assert!(!set.contains(InteractionKind::MouseMove));
        assert!(InteractionSet::empty().is_empty());
        assert!(InteractionKind::ALL
            .into_iter()
            .all(|k| InteractionSet::all().contains(k)));
    }

    #[test]
    fn test_monitor_records_latest_interaction() {
        let start = Instant::now();
        let mut monitor = InteractionMonitor::new(InteractionSet::all(), start);
        assert_eq!(monitor.last_interaction(), start);
        assert_eq!(monitor.last_kind(), None);

        let later = start + Duration::from_millis(30);
        assert!(monitor.notify(InteractionKind::Scroll, later));
        assert_eq!(monitor.last_interaction(), later);
        assert_eq!(monitor.last_kind(), Some(InteractionKind::Scroll));
        assert_eq!(monitor.observed(), 1);
        assert_eq!(
            monitor.time_since_last_interaction(later + Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_monitor_never_moves_backwards() {
        let start = Instant::now();
        let mut monitor = InteractionMonitor::new(InteractionSet::all(), start);
        let later = start + Duration::from_millis(50);

        monitor.notify(InteractionKind::KeyDown, later);
        monitor.notify(InteractionKind::Scroll, start + Duration::from_millis(10));
        assert_eq!(monitor.last_interaction(), later);
        assert_eq!(monitor.observed(), 2);
        assert_eq!(monitor.time_since_last_interaction(start), Duration::ZERO);
    }

    #[test]
    fn test_monitor_ignores_untracked_kinds() {
        let start = Instant::now();
        let tracked: InteractionSet = [InteractionKind::Scroll].into_iter().collect();
        let mut monitor = InteractionMonitor::new(tracked, start);

        assert!(!monitor.notify(
            InteractionKind::MouseMove,
            start + Duration::from_millis(10)
        ));
        assert_eq!(monitor.last_interaction(), start);
        assert_eq!(monitor.observed(), 0);
    }
}
