//! Stateful queue items and playback-state variants.

use std::sync::Mutex;

use crate::protocol::ResourceRef;
use crate::queue::entry::{EntryId, PlayableProfile, QueueEntry};

/// Point-in-time playback measurements for a playing or paused item.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    /// Position in seconds.
    pub position: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// `position / duration`, clamped to 1.0 when the division is not finite.
    pub progress: f64,
    /// Whether downstream progress displays should animate this update.
    pub animated: bool,
}

impl PlaybackSnapshot {
    pub fn new(position: f64, duration: f64, animated: bool) -> Self {
        Self {
            position,
            duration,
            progress: progress_fraction(position, duration),
            animated,
        }
    }
}

/// Position/duration division treated as fully played when degenerate
/// (zero or unknown duration).
pub fn progress_fraction(position: f64, duration: f64) -> f64 {
    let progress = position / duration;
    if progress.is_finite() {
        progress
    } else {
        1.0
    }
}

/// Live playback state of one queue item.
#[derive(Debug, Clone)]
pub enum PlaybackState {
    /// Initial state before any dequeue work.
    Waiting,
    /// Remote resource transfer in flight; `interactive` marks transfers
    /// started for an explicit play request.
    Fetching { progress: f32, interactive: bool },
    Playing(PlaybackSnapshot),
    Paused(PlaybackSnapshot),
    /// Terminal within one session; re-entered via `Waiting` on re-dequeue.
    Stopped,
}

impl PartialEq for PlaybackState {
    /// Change-suppression equality: playing/paused compare only
    /// `(position, duration)`, fetching compares only the progress scalar.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PlaybackState::Waiting, PlaybackState::Waiting) => true,
            (PlaybackState::Stopped, PlaybackState::Stopped) => true,
            (PlaybackState::Playing(a), PlaybackState::Playing(b))
            | (PlaybackState::Paused(a), PlaybackState::Paused(b)) => {
                a.position == b.position && a.duration == b.duration
            }
            (
                PlaybackState::Fetching { progress: a, .. },
                PlaybackState::Fetching { progress: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// Stateful wrapper around one queue entry.
///
/// The controller owns the live item collection; externally held references
/// only read snapshots through the accessors. Items are created once per
/// stable id and reused across transitions while their entry is unchanged,
/// preserving in-flight state such as fetch progress.
#[derive(Debug)]
pub struct QueueItem {
    entry: QueueEntry,
    profile: Option<PlayableProfile>,
    state: Mutex<PlaybackState>,
}

impl QueueItem {
    pub fn new(entry: QueueEntry) -> Self {
        let profile = entry.playable_profile();
        Self {
            entry,
            profile,
            state: Mutex::new(PlaybackState::Waiting),
        }
    }

    pub fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    pub fn stable_id(&self) -> EntryId {
        self.entry.stable_id()
    }

    pub fn is_playable(&self) -> bool {
        self.profile.is_some()
    }

    pub fn title(&self) -> &str {
        self.profile
            .as_ref()
            .map(|profile| profile.title.as_str())
            .unwrap_or("")
    }

    pub fn performer(&self) -> &str {
        self.profile
            .as_ref()
            .map(|profile| profile.performer.as_str())
            .unwrap_or("")
    }

    pub fn resource(&self) -> Option<&ResourceRef> {
        self.profile.as_ref().map(|profile| &profile.resource)
    }

    pub fn ext(&self) -> Option<&str> {
        self.profile.as_ref().map(|profile| profile.ext.as_str())
    }

    /// Fetch/display profile of a playable item.
    ///
    /// Entry variants are produced solely by internal normalization, so a
    /// profile request on a non-playable item is a programming error.
    pub(crate) fn profile(&self) -> &PlayableProfile {
        self.profile
            .as_ref()
            .expect("playable profile requested for a non-playable item")
    }

    /// Snapshot of the current playback state.
    pub fn state(&self) -> PlaybackState {
        self.state.lock().expect("item state poisoned").clone()
    }

    /// Stores a new state; returns whether it materially changed under the
    /// suppression equality.
    pub(crate) fn set_state(&self, state: PlaybackState) -> bool {
        let mut current = self.state.lock().expect("item state poisoned");
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    }

    /// Stores a new state and always reports a change. Used by the
    /// scrub-while-paused path so listeners re-fire on the new timestamp.
    pub(crate) fn force_state(&self, state: PlaybackState) -> bool {
        *self.state.lock().expect("item state poisoned") = state;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SingleTrack;

    fn single_item() -> QueueItem {
        QueueItem::new(QueueEntry::Single(SingleTrack {
            resource: ResourceRef("res".to_string()),
            mime_type: "audio/mpeg".to_string(),
            name: Some("Track".to_string()),
            performer: None,
            id: None,
        }))
    }

    #[test]
    fn test_progress_clamps_to_one_for_zero_duration() {
        assert_eq!(progress_fraction(0.0, 0.0), 1.0);
        assert_eq!(progress_fraction(3.0, 0.0), 1.0);
        assert_eq!(progress_fraction(5.0, 10.0), 0.5);
    }

    #[test]
    fn test_playing_snapshot_clamps_progress() {
        let snapshot = PlaybackSnapshot::new(0.0, 0.0, false);
        assert_eq!(snapshot.progress, 1.0);
        let snapshot = PlaybackSnapshot::new(2.0, 8.0, false);
        assert_eq!(snapshot.progress, 0.25);
    }

    #[test]
    fn test_playing_equality_ignores_progress_and_animated() {
        let a = PlaybackState::Playing(PlaybackSnapshot {
            position: 2.0,
            duration: 8.0,
            progress: 0.25,
            animated: false,
        });
        let b = PlaybackState::Playing(PlaybackSnapshot {
            position: 2.0,
            duration: 8.0,
            progress: 0.9,
            animated: true,
        });
        assert_eq!(a, b);
    }

    #[test]
    fn test_playing_and_paused_never_compare_equal() {
        let snapshot = PlaybackSnapshot::new(2.0, 8.0, false);
        assert_ne!(
            PlaybackState::Playing(snapshot.clone()),
            PlaybackState::Paused(snapshot)
        );
    }

    #[test]
    fn test_fetching_compares_on_progress_only() {
        let a = PlaybackState::Fetching {
            progress: 0.5,
            interactive: true,
        };
        let b = PlaybackState::Fetching {
            progress: 0.5,
            interactive: false,
        };
        let c = PlaybackState::Fetching {
            progress: 0.6,
            interactive: true,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_set_state_suppresses_equal_writes() {
        let item = single_item();
        assert!(item.set_state(PlaybackState::Playing(PlaybackSnapshot::new(1.0, 4.0, false))));
        assert!(!item.set_state(PlaybackState::Playing(PlaybackSnapshot::new(1.0, 4.0, true))));
        assert!(item.set_state(PlaybackState::Playing(PlaybackSnapshot::new(2.0, 4.0, true))));
    }

    #[test]
    fn test_force_state_always_reports_change() {
        let item = single_item();
        let snapshot = PlaybackSnapshot::new(1.0, 4.0, true);
        assert!(item.set_state(PlaybackState::Paused(snapshot.clone())));
        assert!(item.force_state(PlaybackState::Paused(snapshot)));
    }
}
