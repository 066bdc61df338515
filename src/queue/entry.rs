//! Queue entry variants, stable identity, ordering, and display resolution.

use crate::diff::DiffEntry;
use crate::protocol::{
    HistoryGap, MediaKind, MessageId, MessageOrd, MessageRecord, ResourceRef, SingleTrack,
};

/// Stable identity of one queue entry.
///
/// Two entries representing the same real-world object always produce the
/// same id, regardless of transient attributes or list position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// A playable history message.
    Message(MessageId),
    /// A history gap, keyed by its newest bounding message.
    Gap(MessageId),
    /// An injected one-off track.
    External(String),
}

/// One normalized element of the playback queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    /// Playable message from a history view.
    Track(MessageRecord),
    /// Not-yet-loaded span in the history view.
    Gap(HistoryGap),
    /// One-off track injected outside any history view.
    Single(SingleTrack),
}

/// Fetch/display attributes resolved for a playable entry.
#[derive(Debug, Clone)]
pub struct PlayableProfile {
    pub resource: ResourceRef,
    /// File-extension hint handed to the player backend.
    pub ext: String,
    pub title: String,
    pub performer: String,
}

impl QueueEntry {
    pub fn stable_id(&self) -> EntryId {
        match self {
            QueueEntry::Track(record) => EntryId::Message(record.id),
            QueueEntry::Gap(gap) => EntryId::Gap(gap.newest.id),
            QueueEntry::Single(single) => EntryId::External(
                single
                    .id
                    .clone()
                    .unwrap_or_else(|| derived_single_id(&single.resource)),
            ),
        }
    }

    /// Ordering key; used only for ordering, never for identity.
    pub fn sort_key(&self) -> MessageOrd {
        match self {
            QueueEntry::Track(record) => record.ord(),
            QueueEntry::Gap(gap) => gap.newest,
            QueueEntry::Single(_) => MessageOrd::LOWER_BOUND,
        }
    }

    pub fn is_playable(&self) -> bool {
        !matches!(self, QueueEntry::Gap(_))
    }

    /// Resolves fetch and display attributes; `None` for gap entries.
    pub fn playable_profile(&self) -> Option<PlayableProfile> {
        match self {
            QueueEntry::Track(record) => {
                let media = record.media.as_ref()?;
                let (title, performer) = match media.kind {
                    MediaKind::Voice | MediaKind::VideoMessage => {
                        let title = if media.kind == MediaKind::Voice {
                            "Voice Message"
                        } else {
                            "Video Message"
                        };
                        let performer = record
                            .forwarded_from
                            .clone()
                            .or_else(|| {
                                if record.outgoing {
                                    Some("You".to_string())
                                } else {
                                    record.author.clone()
                                }
                            })
                            .unwrap_or_default();
                        (title.to_string(), performer)
                    }
                    MediaKind::Music => (
                        media
                            .title
                            .clone()
                            .unwrap_or_else(|| "Untitled Song".to_string()),
                        media
                            .performer
                            .clone()
                            .unwrap_or_else(|| "Unknown Artist".to_string()),
                    ),
                };
                Some(PlayableProfile {
                    resource: media.resource.clone(),
                    ext: resolve_ext(&media.mime_type, media.file_name.as_deref()),
                    title,
                    performer,
                })
            }
            QueueEntry::Gap(_) => None,
            QueueEntry::Single(single) => Some(PlayableProfile {
                resource: single.resource.clone(),
                ext: resolve_ext(&single.mime_type, None),
                title: single.name.clone().unwrap_or_default(),
                performer: single.performer.clone().unwrap_or_default(),
            }),
        }
    }
}

fn derived_single_id(resource: &ResourceRef) -> String {
    format!("{:x}", md5::compute(resource.0.as_bytes()))
}

fn resolve_ext(mime_type: &str, file_name: Option<&str>) -> String {
    if mime_type.contains("m4a") {
        "m4a".to_string()
    } else if mime_type.contains("mp4") {
        "mp4".to_string()
    } else if let Some(ext) = file_name.and_then(|name| name.rsplit_once('.').map(|(_, e)| e)) {
        ext.to_string()
    } else {
        "mp3".to_string()
    }
}

impl DiffEntry for QueueEntry {
    type Id = EntryId;

    fn stable_id(&self) -> EntryId {
        QueueEntry::stable_id(self)
    }

    fn content_eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Message identity is the whole payload here; edits that keep
            // the id do not rebuild the live item.
            (QueueEntry::Track(a), QueueEntry::Track(b)) => a.id == b.id,
            (QueueEntry::Gap(a), QueueEntry::Gap(b)) => a == b,
            (QueueEntry::Single(a), QueueEntry::Single(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MediaAttachment, PeerId};

    fn message_record(id: i32, timestamp: i64, kind: MediaKind) -> MessageRecord {
        MessageRecord {
            id: MessageId {
                peer: PeerId(1),
                id,
            },
            timestamp,
            author: Some("Alice".to_string()),
            forwarded_from: None,
            outgoing: false,
            revision: 0,
            text: String::new(),
            media: Some(MediaAttachment {
                resource: ResourceRef(format!("res-{id}")),
                mime_type: "audio/ogg".to_string(),
                file_name: Some(format!("voice-{id}.oga")),
                title: None,
                performer: None,
                kind,
                duration_secs: 4,
            }),
        }
    }

    #[test]
    fn test_stable_id_survives_transient_attribute_changes() {
        let mut a = message_record(7, 100, MediaKind::Voice);
        let mut b = a.clone();
        b.revision = 3;
        b.text = "edited".to_string();
        a.timestamp = 100;

        let entry_a = QueueEntry::Track(a);
        let entry_b = QueueEntry::Track(b);
        assert_eq!(entry_a.stable_id(), entry_b.stable_id());
        assert!(entry_a.content_eq(&entry_b));
    }

    #[test]
    fn test_single_id_derives_deterministically_from_resource() {
        let single = SingleTrack {
            resource: ResourceRef("res-x".to_string()),
            mime_type: "audio/mpeg".to_string(),
            name: None,
            performer: None,
            id: None,
        };
        let a = QueueEntry::Single(single.clone()).stable_id();
        let b = QueueEntry::Single(single).stable_id();
        assert_eq!(a, b);
        assert!(matches!(a, EntryId::External(_)));
    }

    #[test]
    fn test_explicit_single_id_wins_over_derivation() {
        let single = SingleTrack {
            resource: ResourceRef("res-x".to_string()),
            mime_type: "audio/mpeg".to_string(),
            name: None,
            performer: None,
            id: Some("pinned".to_string()),
        };
        assert_eq!(
            QueueEntry::Single(single).stable_id(),
            EntryId::External("pinned".to_string())
        );
    }

    #[test]
    fn test_sort_key_orders_tracks_chronologically_and_singles_first() {
        let older = QueueEntry::Track(message_record(1, 100, MediaKind::Music));
        let newer = QueueEntry::Track(message_record(2, 200, MediaKind::Music));
        let single = QueueEntry::Single(SingleTrack {
            resource: ResourceRef("res".to_string()),
            mime_type: "audio/mpeg".to_string(),
            name: None,
            performer: None,
            id: None,
        });

        assert!(older.sort_key() < newer.sort_key());
        assert!(single.sort_key() < older.sort_key());
    }

    #[test]
    fn test_cross_variant_content_is_never_equal() {
        let track = QueueEntry::Track(message_record(1, 100, MediaKind::Voice));
        let gap = QueueEntry::Gap(HistoryGap {
            newest: MessageOrd {
                timestamp: 100,
                id: MessageId {
                    peer: PeerId(1),
                    id: 1,
                },
            },
            span: 10,
        });
        assert!(!track.content_eq(&gap));
        assert!(!gap.content_eq(&track));
    }

    #[test]
    fn test_voice_profile_prefers_forwarded_author_then_outgoing_you() {
        let mut record = message_record(1, 100, MediaKind::Voice);
        record.forwarded_from = Some("Bob".to_string());
        let profile = QueueEntry::Track(record.clone())
            .playable_profile()
            .expect("playable");
        assert_eq!(profile.title, "Voice Message");
        assert_eq!(profile.performer, "Bob");

        record.forwarded_from = None;
        record.outgoing = true;
        let profile = QueueEntry::Track(record)
            .playable_profile()
            .expect("playable");
        assert_eq!(profile.performer, "You");
    }

    #[test]
    fn test_music_profile_falls_back_to_placeholders() {
        let record = message_record(1, 100, MediaKind::Music);
        let profile = QueueEntry::Track(record)
            .playable_profile()
            .expect("playable");
        assert_eq!(profile.title, "Untitled Song");
        assert_eq!(profile.performer, "Unknown Artist");
    }

    #[test]
    fn test_ext_resolution_prefers_mime_then_file_name() {
        assert_eq!(resolve_ext("audio/m4a", Some("a.ogg")), "m4a");
        assert_eq!(resolve_ext("video/mp4", None), "mp4");
        assert_eq!(resolve_ext("audio/ogg", Some("note.oga")), "oga");
        assert_eq!(resolve_ext("audio/ogg", None), "mp3");
    }

    #[test]
    fn test_gap_has_no_playable_profile() {
        let gap = QueueEntry::Gap(HistoryGap {
            newest: MessageOrd {
                timestamp: 50,
                id: MessageId {
                    peer: PeerId(1),
                    id: 9,
                },
            },
            span: 3,
        });
        assert!(!gap.is_playable());
        assert!(gap.playable_profile().is_none());
    }
}
