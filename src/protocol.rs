//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the domain records normalized from upstream data
//! sources and all message payloads exchanged between the queue controller,
//! the search aggregator, their worker threads, and host-facing consumers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::diff::Transition;
use crate::player::PlayerEvent;
use crate::queue::entry::EntryId;
use crate::queue::item::{PlaybackState, QueueItem};
use crate::search::entry::{SearchEntry, SearchEntryId};

/// Identifier of a chat peer (user, group, or channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
pub struct PeerId(pub i64);

/// Identifier of one message within a peer's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
pub struct MessageId {
    /// Peer the message belongs to.
    pub peer: PeerId,
    /// Message sequence number within the peer.
    pub id: i32,
}

/// Chronological position of a message, used as a sort key.
///
/// Ordering is timestamp-major with the message id as tie breaker, which
/// makes it a strict total order consistent with upstream history order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
pub struct MessageOrd {
    /// Unix timestamp of the message.
    pub timestamp: i64,
    /// Message identity breaking timestamp ties.
    pub id: MessageId,
}

impl MessageOrd {
    /// Sorts before every real message position.
    pub const LOWER_BOUND: MessageOrd = MessageOrd {
        timestamp: i64::MIN,
        id: MessageId {
            peer: PeerId(i64::MIN),
            id: i32::MIN,
        },
    };
}

/// Opaque reference to a media resource held by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct ResourceRef(pub String);

/// Media classification of a playable attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum MediaKind {
    Music,
    Voice,
    VideoMessage,
}

/// Playable media attached to a message.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MediaAttachment {
    /// Resource handle used for fetching.
    pub resource: ResourceRef,
    /// Mime type as reported by the upstream source.
    pub mime_type: String,
    /// Original file name, when known.
    pub file_name: Option<String>,
    /// Track title from media attributes.
    pub title: Option<String>,
    /// Track performer from media attributes.
    pub performer: Option<String>,
    /// Voice/music/video-message classification.
    pub kind: MediaKind,
    /// Reported duration in seconds.
    pub duration_secs: u32,
}

/// One normalized message from history or message search.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MessageRecord {
    pub id: MessageId,
    /// Unix timestamp of the message.
    pub timestamp: i64,
    /// Display name of the author, when known.
    pub author: Option<String>,
    /// Display name of the original author for forwarded messages.
    pub forwarded_from: Option<String>,
    /// Whether the message was sent by the local account.
    pub outgoing: bool,
    /// Upstream revision counter; bumped when message content is edited.
    pub revision: u32,
    /// Message text, used for search result display.
    pub text: String,
    /// Playable attachment, if any.
    pub media: Option<MediaAttachment>,
}

impl MessageRecord {
    /// Chronological sort key of this message.
    pub fn ord(&self) -> MessageOrd {
        MessageOrd {
            timestamp: self.timestamp,
            id: self.id,
        }
    }
}

/// A not-yet-loaded span in a peer's message history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct HistoryGap {
    /// Position of the newest message bounding the gap.
    pub newest: MessageOrd,
    /// Number of records known to be missing, when reported upstream.
    pub span: u32,
}

/// A one-off playable track injected outside any history view.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SingleTrack {
    pub resource: ResourceRef,
    pub mime_type: String,
    pub name: Option<String>,
    pub performer: Option<String>,
    /// Explicit stable identity; derived from the resource when absent.
    pub id: Option<String>,
}

/// Peer classification used by search result grouping and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum PeerKind {
    User,
    Group,
    Channel,
    /// Secret chat referencing another user; carries its own identity.
    Secret,
}

/// One normalized peer from local or remote search.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PeerRecord {
    pub id: PeerId,
    /// Display name.
    pub name: String,
    /// Public handle without the leading marker, when the peer has one.
    pub handle: Option<String>,
    pub kind: PeerKind,
    /// Member/subscriber count for groups and channels.
    pub subscribers: Option<u32>,
}

/// Repeat behavior applied when the current track finishes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum RepeatMode {
    Off,   // Advance per queue policy
    Track, // Replay the current track
}

/// Anchor location for a history view request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistoryLocation {
    /// Newest end of the history.
    Initial,
    /// Window centered on a specific message position.
    Around(MessageOrd),
}

/// Media tag filter applied to a history view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFilter {
    Music,
    VoiceOrVideoMessage,
}

/// One raw record delivered by a history view.
#[derive(Debug, Clone)]
pub enum HistoryRecord {
    Message(MessageRecord),
    Gap(HistoryGap),
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Queue(QueueMessage),
    Search(SearchMessage),
}

/// Queue-domain commands, worker deliveries, and notifications.
#[derive(Debug, Clone)]
pub enum QueueMessage {
    // Commands
    Play,
    Pause,
    PlayOrPause,
    Stop,
    Next,
    Previous,
    ToggleRepeat,
    /// Scrub to a fraction of the current track's duration.
    Seek(f32),
    Shutdown,
    /// Another session took over the global playback slot.
    Deactivate {
        session: uuid::Uuid,
    },

    // Worker deliveries
    /// New history window in upstream order.
    HistoryWindow {
        generation: u64,
        records: Vec<HistoryRecord>,
    },
    /// Diff result computed on the preparation queue.
    TransitionReady {
        seq: u64,
        transition: Transition<Arc<QueueItem>>,
    },
    /// Fetch progress for the resource backing the dequeued item.
    ResourceFetching {
        generation: u64,
        progress: f32,
    },
    /// The resource backing the dequeued item is fully local.
    ResourceReady {
        generation: u64,
        path: PathBuf,
    },
    /// External player callback, tagged with the player's generation.
    Player {
        generation: u64,
        event: PlayerEvent,
    },
    /// Progress sampling timer tick.
    ProgressTick {
        generation: u64,
    },

    // Notifications
    /// First transition applied and start position resolved.
    Ready,
    /// The dequeued item changed.
    ItemChanged(EntryId),
    /// The dequeued item's playback state materially changed.
    StateChanged(EntryId, PlaybackState),
    StartedPlaying(EntryId),
    StoppedPlaying(EntryId),
    TimebaseChanged(EntryId),
    /// Playback reached the end of the queue.
    QueueCompleted,
    RepeatModeChanged(RepeatMode),
    /// Live collection shape after a merge or dequeue.
    QueueChanged {
        item_count: usize,
        current_index: Option<usize>,
    },
}

/// Search-domain commands, worker deliveries, and notifications.
#[derive(Debug, Clone)]
pub enum SearchMessage {
    // Commands
    /// Replace the active query; `None` enters empty-query mode.
    SetQuery(Option<String>),
    /// A rendered row was selected.
    Select {
        id: SearchEntryId,
        by_click: bool,
    },
    RemoveRecent(PeerId),
    ClearRecent,
    Shutdown,

    // Worker deliveries
    LocalPeers {
        generation: u64,
        peers: Vec<PeerRecord>,
        saved: Option<PeerRecord>,
    },
    GlobalPeers {
        generation: u64,
        peers: Vec<PeerRecord>,
    },
    MessageHits {
        generation: u64,
        messages: Vec<MessageRecord>,
    },
    /// Popular and recently-searched peers for empty-query mode.
    EmptyModePeers {
        generation: u64,
        popular: Vec<PeerRecord>,
        recent: Vec<PeerRecord>,
    },
    /// Diff result computed on the preparation queue.
    TransitionReady {
        seq: u64,
        transition: Transition<SearchEntry>,
        is_loading: bool,
    },

    // Notifications
    /// A transition was applied to the live row list.
    Applied {
        transition: Transition<SearchEntry>,
    },
    /// Aggregated loading flag changed.
    LoadingChanged(bool),
    /// A peer or message hit was activated.
    Open {
        peer: PeerId,
        message: Option<MessageId>,
        by_click: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ord_is_timestamp_major() {
        let early = MessageOrd {
            timestamp: 100,
            id: MessageId {
                peer: PeerId(1),
                id: 900,
            },
        };
        let late = MessageOrd {
            timestamp: 200,
            id: MessageId {
                peer: PeerId(1),
                id: 5,
            },
        };
        assert!(early < late);
    }

    #[test]
    fn test_message_ord_breaks_timestamp_ties_by_id() {
        let a = MessageOrd {
            timestamp: 100,
            id: MessageId {
                peer: PeerId(1),
                id: 5,
            },
        };
        let b = MessageOrd {
            timestamp: 100,
            id: MessageId {
                peer: PeerId(1),
                id: 6,
            },
        };
        assert!(a < b);
    }

    #[test]
    fn test_lower_bound_sorts_before_any_real_position() {
        let real = MessageOrd {
            timestamp: i64::MIN,
            id: MessageId {
                peer: PeerId(0),
                id: 0,
            },
        };
        assert!(MessageOrd::LOWER_BOUND < real);
    }
}
