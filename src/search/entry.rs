//! Search entry variants, bucketed ordering, and stable identity.
//!
//! Each source tags its entries with a disjoint index range so the merged
//! list groups by source: local matches from 1, global matches from 10001,
//! message hits from 20001, with separators on the range bases.

use crate::diff::DiffEntry;
use crate::protocol::{MessageId, MessageRecord, PeerId, PeerKind, PeerRecord};

/// Separator/bucket base for local chats and contacts.
pub const LOCAL_SECTION_BASE: i64 = 0;
/// Separator/bucket base for global directory matches.
pub const GLOBAL_SECTION_BASE: i64 = 10_000;
/// Separator/bucket base for message hits.
pub const MESSAGE_SECTION_BASE: i64 = 20_000;

/// Stable identity of one search row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchEntryId {
    SavedMessages,
    LocalPeer(PeerId),
    /// Secret chats carry their own identity apart from the main peer row.
    SecretChat(PeerId),
    RecentPeer(PeerId),
    GlobalPeer(PeerId),
    Message(MessageId),
    Separator(i64),
    EmptySearch,
}

/// Section label rendered by the host; no display strings at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLabel {
    ChatsAndContacts,
    GlobalSearch,
    Messages,
    Popular,
    Recent,
}

/// Affordance state carried by a separator row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorState {
    None,
    /// Collapsed; the affordance offers "show more".
    Short,
    /// Expanded; the affordance offers "show less".
    All,
    /// The affordance clears the section.
    Clear,
}

/// One row of the merged search result list.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEntry {
    SavedMessages(PeerRecord),
    LocalPeer {
        peer: PeerRecord,
        index: i64,
    },
    RecentPeer {
        peer: PeerRecord,
        index: i64,
    },
    GlobalPeer {
        peer: PeerRecord,
        index: i64,
    },
    MessageHit {
        message: MessageRecord,
        index: i64,
    },
    Separator {
        section: SectionLabel,
        index: i64,
        state: SeparatorState,
    },
    /// Non-empty query with all sources resolved and nothing found.
    EmptySearch,
}

impl SearchEntry {
    pub fn stable_id(&self) -> SearchEntryId {
        match self {
            SearchEntry::SavedMessages(_) => SearchEntryId::SavedMessages,
            SearchEntry::LocalPeer { peer, .. } => {
                if peer.kind == PeerKind::Secret {
                    SearchEntryId::SecretChat(peer.id)
                } else {
                    SearchEntryId::LocalPeer(peer.id)
                }
            }
            SearchEntry::RecentPeer { peer, .. } => {
                if peer.kind == PeerKind::Secret {
                    SearchEntryId::SecretChat(peer.id)
                } else {
                    SearchEntryId::RecentPeer(peer.id)
                }
            }
            SearchEntry::GlobalPeer { peer, .. } => SearchEntryId::GlobalPeer(peer.id),
            SearchEntry::MessageHit { message, .. } => SearchEntryId::Message(message.id),
            SearchEntry::Separator { index, .. } => SearchEntryId::Separator(*index),
            SearchEntry::EmptySearch => SearchEntryId::EmptySearch,
        }
    }

    /// Bucketed sort index; used only for ordering.
    pub fn sort_index(&self) -> i64 {
        match self {
            SearchEntry::SavedMessages(_) => -1,
            SearchEntry::LocalPeer { index, .. }
            | SearchEntry::RecentPeer { index, .. }
            | SearchEntry::GlobalPeer { index, .. }
            | SearchEntry::MessageHit { index, .. }
            | SearchEntry::Separator { index, .. } => *index,
            SearchEntry::EmptySearch => 0,
        }
    }

    /// Peer identity opened on selection, when the row maps to a peer.
    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            SearchEntry::SavedMessages(peer)
            | SearchEntry::LocalPeer { peer, .. }
            | SearchEntry::RecentPeer { peer, .. }
            | SearchEntry::GlobalPeer { peer, .. } => Some(peer.id),
            SearchEntry::MessageHit { message, .. } => Some(message.id.peer),
            _ => None,
        }
    }
}

impl DiffEntry for SearchEntry {
    type Id = SearchEntryId;

    fn stable_id(&self) -> SearchEntryId {
        SearchEntry::stable_id(self)
    }

    fn content_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SearchEntry::SavedMessages(a), SearchEntry::SavedMessages(b)) => a == b,
            (
                SearchEntry::LocalPeer { peer: a, index: ai },
                SearchEntry::LocalPeer { peer: b, index: bi },
            )
            | (
                SearchEntry::RecentPeer { peer: a, index: ai },
                SearchEntry::RecentPeer { peer: b, index: bi },
            )
            | (
                SearchEntry::GlobalPeer { peer: a, index: ai },
                SearchEntry::GlobalPeer { peer: b, index: bi },
            ) => a == b && ai == bi,
            (
                SearchEntry::MessageHit {
                    message: a,
                    index: ai,
                },
                SearchEntry::MessageHit {
                    message: b,
                    index: bi,
                },
            ) => ai == bi && a.id == b.id && a.revision == b.revision,
            (
                SearchEntry::Separator {
                    section: asec,
                    index: ai,
                    state: ast,
                },
                SearchEntry::Separator {
                    section: bsec,
                    index: bi,
                    state: bst,
                },
            ) => asec == bsec && ai == bi && ast == bst,
            (SearchEntry::EmptySearch, SearchEntry::EmptySearch) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: i64, name: &str, kind: PeerKind) -> PeerRecord {
        PeerRecord {
            id: PeerId(id),
            name: name.to_string(),
            handle: None,
            kind,
            subscribers: None,
        }
    }

    fn message(peer_id: i64, id: i32, revision: u32) -> MessageRecord {
        MessageRecord {
            id: MessageId {
                peer: PeerId(peer_id),
                id,
            },
            timestamp: 0,
            author: None,
            forwarded_from: None,
            outgoing: false,
            revision,
            text: "hit".to_string(),
            media: None,
        }
    }

    #[test]
    fn test_secret_chats_have_their_own_identity() {
        let regular = SearchEntry::LocalPeer {
            peer: peer(1, "a", PeerKind::User),
            index: 1,
        };
        let secret = SearchEntry::LocalPeer {
            peer: peer(1, "a", PeerKind::Secret),
            index: 2,
        };
        assert_eq!(regular.stable_id(), SearchEntryId::LocalPeer(PeerId(1)));
        assert_eq!(secret.stable_id(), SearchEntryId::SecretChat(PeerId(1)));
        assert_ne!(regular.stable_id(), secret.stable_id());
    }

    #[test]
    fn test_message_hits_update_on_revision_change() {
        let a = SearchEntry::MessageHit {
            message: message(1, 5, 0),
            index: 20_001,
        };
        let b = SearchEntry::MessageHit {
            message: message(1, 5, 1),
            index: 20_001,
        };
        assert_eq!(a.stable_id(), b.stable_id());
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_peer_rows_compare_on_record_and_index() {
        let a = SearchEntry::GlobalPeer {
            peer: peer(2, "chan", PeerKind::Channel),
            index: 10_001,
        };
        let mut renamed = peer(2, "chan", PeerKind::Channel);
        renamed.name = "renamed".to_string();
        let b = SearchEntry::GlobalPeer {
            peer: renamed,
            index: 10_001,
        };
        assert_eq!(a.stable_id(), b.stable_id());
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_sort_index_buckets_group_sources() {
        let local = SearchEntry::LocalPeer {
            peer: peer(1, "a", PeerKind::User),
            index: 1,
        };
        let global = SearchEntry::GlobalPeer {
            peer: peer(2, "b", PeerKind::User),
            index: GLOBAL_SECTION_BASE + 1,
        };
        let hit = SearchEntry::MessageHit {
            message: message(1, 5, 0),
            index: MESSAGE_SECTION_BASE + 1,
        };
        assert!(local.sort_index() < global.sort_index());
        assert!(global.sort_index() < hit.sort_index());
    }

    #[test]
    fn test_cross_variant_content_is_never_equal() {
        let local = SearchEntry::LocalPeer {
            peer: peer(1, "a", PeerKind::User),
            index: 1,
        };
        let recent = SearchEntry::RecentPeer {
            peer: peer(1, "a", PeerKind::User),
            index: 1,
        };
        assert!(!local.content_eq(&recent));
    }
}
