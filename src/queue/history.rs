//! Upstream history plumbing: the source trait, record-to-entry mapping,
//! and an in-process source for tests and demos.
//!
//! History windows arrive in ascending chronological order (oldest first),
//! matching the upstream view order. Queue traversal runs against that
//! order: "next" moves toward older items, so it decrements the pointer.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use log::debug;

use crate::protocol::{
    HistoryLocation, HistoryRecord, MediaFilter, MediaKind, MessageId, MessageOrd, MessageRecord,
    PeerId,
};
use crate::queue::entry::QueueEntry;

/// Upstream data source streaming ordered history windows.
pub trait HistorySource: Send + Sync {
    /// Opens a live view of the peer's media history around `location`.
    ///
    /// The first emission is the initial window; later emissions reflect
    /// upstream changes. Windows carry at most `count` records matching
    /// `filter`, ascending by position.
    fn view(
        &self,
        peer: PeerId,
        location: HistoryLocation,
        count: usize,
        filter: MediaFilter,
    ) -> Receiver<Vec<HistoryRecord>>;
}

/// Maps one history window to queue entries, preserving order.
pub(crate) fn entries_from_records(records: &[HistoryRecord]) -> Vec<QueueEntry> {
    records
        .iter()
        .map(|record| match record {
            HistoryRecord::Message(message) => QueueEntry::Track(message.clone()),
            HistoryRecord::Gap(gap) => QueueEntry::Gap(gap.clone()),
        })
        .collect()
}

fn message_matches_filter(message: &MessageRecord, filter: MediaFilter) -> bool {
    match (&message.media, filter) {
        (Some(media), MediaFilter::Music) => media.kind == MediaKind::Music,
        (Some(media), MediaFilter::VoiceOrVideoMessage) => {
            media.kind == MediaKind::Voice || media.kind == MediaKind::VideoMessage
        }
        (None, _) => false,
    }
}

fn record_ord(record: &HistoryRecord) -> MessageOrd {
    match record {
        HistoryRecord::Message(message) => message.ord(),
        HistoryRecord::Gap(gap) => gap.newest,
    }
}

struct LiveView {
    peer: PeerId,
    location: HistoryLocation,
    count: usize,
    filter: MediaFilter,
    sender: Sender<Vec<HistoryRecord>>,
}

struct MemoryHistoryInner {
    records: HashMap<PeerId, Vec<HistoryRecord>>,
    views: Vec<LiveView>,
}

/// In-process history source backed by per-peer record lists.
///
/// Mutations re-emit fresh windows to every live view of the touched peer,
/// which is what drives re-entrant merges in controller tests.
pub struct MemoryHistorySource {
    inner: Mutex<MemoryHistoryInner>,
}

impl MemoryHistorySource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryHistoryInner {
                records: HashMap::new(),
                views: Vec::new(),
            }),
        }
    }

    pub fn push_message(&self, message: MessageRecord) {
        let peer = message.id.peer;
        self.mutate(peer, |records| {
            let record = HistoryRecord::Message(message);
            let position = records
                .iter()
                .position(|existing| record_ord(existing) > record_ord(&record))
                .unwrap_or(records.len());
            records.insert(position, record);
        });
    }

    pub fn push_gap(&self, peer: PeerId, gap: crate::protocol::HistoryGap) {
        self.mutate(peer, |records| {
            let record = HistoryRecord::Gap(gap);
            let position = records
                .iter()
                .position(|existing| record_ord(existing) > record_ord(&record))
                .unwrap_or(records.len());
            records.insert(position, record);
        });
    }

    pub fn remove_message(&self, id: MessageId) {
        self.mutate(id.peer, |records| {
            records.retain(
                |record| !matches!(record, HistoryRecord::Message(message) if message.id == id),
            );
        });
    }

    /// Replaces a peer's records wholesale, emitting a single window.
    pub fn replace_records(&self, peer: PeerId, mut records: Vec<HistoryRecord>) {
        records.sort_by_key(record_ord);
        self.mutate(peer, |existing| {
            *existing = records;
        });
    }

    fn mutate(&self, peer: PeerId, apply: impl FnOnce(&mut Vec<HistoryRecord>)) {
        let mut inner = self.inner.lock().expect("history source poisoned");
        apply(inner.records.entry(peer).or_default());
        let windows: Vec<(usize, Vec<HistoryRecord>)> = inner
            .views
            .iter()
            .enumerate()
            .filter(|(_, view)| view.peer == peer)
            .map(|(index, view)| {
                (
                    index,
                    window(
                        inner.records.get(&peer).map(Vec::as_slice).unwrap_or(&[]),
                        view.location,
                        view.count,
                        view.filter,
                    ),
                )
            })
            .collect();
        let mut dead = Vec::new();
        for (index, records) in windows {
            if inner.views[index].sender.send(records).is_err() {
                dead.push(index);
            }
        }
        for index in dead.into_iter().rev() {
            inner.views.remove(index);
        }
    }
}

impl Default for MemoryHistorySource {
    fn default() -> Self {
        Self::new()
    }
}

fn window(
    records: &[HistoryRecord],
    location: HistoryLocation,
    count: usize,
    filter: MediaFilter,
) -> Vec<HistoryRecord> {
    let filtered: Vec<&HistoryRecord> = records
        .iter()
        .filter(|record| match record {
            HistoryRecord::Message(message) => message_matches_filter(message, filter),
            HistoryRecord::Gap(_) => true,
        })
        .collect();

    let slice: Vec<HistoryRecord> = match location {
        HistoryLocation::Initial => filtered
            .iter()
            .skip(filtered.len().saturating_sub(count))
            .map(|record| (*record).clone())
            .collect(),
        HistoryLocation::Around(anchor) => {
            let center = filtered
                .iter()
                .position(|record| record_ord(record) >= anchor)
                .unwrap_or(filtered.len().saturating_sub(1));
            let start = center.saturating_sub(count / 2);
            filtered
                .iter()
                .skip(start)
                .take(count)
                .map(|record| (*record).clone())
                .collect()
        }
    };
    slice
}

impl HistorySource for MemoryHistorySource {
    fn view(
        &self,
        peer: PeerId,
        location: HistoryLocation,
        count: usize,
        filter: MediaFilter,
    ) -> Receiver<Vec<HistoryRecord>> {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.inner.lock().expect("history source poisoned");
        let initial = window(
            inner.records.get(&peer).map(Vec::as_slice).unwrap_or(&[]),
            location,
            count,
            filter,
        );
        debug!(
            "MemoryHistorySource: opening view peer={:?} records={}",
            peer,
            initial.len()
        );
        let _ = sender.send(initial);
        inner.views.push(LiveView {
            peer,
            location,
            count,
            filter,
            sender,
        });
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HistoryGap, MediaAttachment, ResourceRef};

    fn voice_message(peer: i64, id: i32, timestamp: i64) -> MessageRecord {
        MessageRecord {
            id: MessageId {
                peer: PeerId(peer),
                id,
            },
            timestamp,
            author: Some("Alice".to_string()),
            forwarded_from: None,
            outgoing: false,
            revision: 0,
            text: String::new(),
            media: Some(MediaAttachment {
                resource: ResourceRef(format!("voice-{peer}-{id}")),
                mime_type: "audio/ogg".to_string(),
                file_name: None,
                title: None,
                performer: None,
                kind: MediaKind::Voice,
                duration_secs: 3,
            }),
        }
    }

    fn music_message(peer: i64, id: i32, timestamp: i64) -> MessageRecord {
        let mut record = voice_message(peer, id, timestamp);
        if let Some(media) = record.media.as_mut() {
            media.kind = MediaKind::Music;
        }
        record
    }

    fn message_ids(records: &[HistoryRecord]) -> Vec<i32> {
        records
            .iter()
            .filter_map(|record| match record {
                HistoryRecord::Message(message) => Some(message.id.id),
                HistoryRecord::Gap(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_window_is_ascending_and_filtered() {
        let source = MemoryHistorySource::new();
        source.push_message(voice_message(1, 3, 300));
        source.push_message(voice_message(1, 1, 100));
        source.push_message(music_message(1, 2, 200));

        let view = source.view(
            PeerId(1),
            HistoryLocation::Initial,
            100,
            MediaFilter::VoiceOrVideoMessage,
        );
        let records = view.try_recv().expect("expected initial window");
        assert_eq!(message_ids(&records), vec![1, 3]);
    }

    #[test]
    fn test_initial_window_trims_to_newest_count() {
        let source = MemoryHistorySource::new();
        for id in 1..=6 {
            source.push_message(voice_message(1, id, id as i64 * 100));
        }

        let view = source.view(
            PeerId(1),
            HistoryLocation::Initial,
            3,
            MediaFilter::VoiceOrVideoMessage,
        );
        let records = view.try_recv().expect("expected initial window");
        assert_eq!(message_ids(&records), vec![4, 5, 6]);
    }

    #[test]
    fn test_mutations_re_emit_windows_to_live_views() {
        let source = MemoryHistorySource::new();
        source.push_message(voice_message(1, 1, 100));

        let view = source.view(
            PeerId(1),
            HistoryLocation::Initial,
            100,
            MediaFilter::VoiceOrVideoMessage,
        );
        assert_eq!(message_ids(&view.try_recv().expect("initial")), vec![1]);

        source.push_message(voice_message(1, 2, 200));
        assert_eq!(message_ids(&view.try_recv().expect("update")), vec![1, 2]);

        source.remove_message(MessageId {
            peer: PeerId(1),
            id: 1,
        });
        assert_eq!(message_ids(&view.try_recv().expect("removal")), vec![2]);
    }

    #[test]
    fn test_window_around_anchor_centers_on_position() {
        let source = MemoryHistorySource::new();
        for id in 1..=9 {
            source.push_message(voice_message(1, id, id as i64 * 100));
        }

        let anchor = MessageOrd {
            timestamp: 500,
            id: MessageId {
                peer: PeerId(1),
                id: 5,
            },
        };
        let view = source.view(
            PeerId(1),
            HistoryLocation::Around(anchor),
            3,
            MediaFilter::VoiceOrVideoMessage,
        );
        let records = view.try_recv().expect("expected window");
        assert_eq!(message_ids(&records), vec![4, 5, 6]);
    }

    #[test]
    fn test_gaps_pass_every_filter_and_map_to_gap_entries() {
        let source = MemoryHistorySource::new();
        source.push_message(voice_message(1, 2, 200));
        source.push_gap(
            PeerId(1),
            HistoryGap {
                newest: MessageOrd {
                    timestamp: 100,
                    id: MessageId {
                        peer: PeerId(1),
                        id: 1,
                    },
                },
                span: 5,
            },
        );

        let view = source.view(
            PeerId(1),
            HistoryLocation::Initial,
            100,
            MediaFilter::Music,
        );
        let records = view.try_recv().expect("expected window");
        assert_eq!(records.len(), 1);

        let entries = entries_from_records(&records);
        assert!(matches!(entries[0], QueueEntry::Gap(_)));
    }
}
