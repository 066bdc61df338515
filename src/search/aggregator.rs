//! Search aggregation pipeline.
//!
//! Merges three asynchronous sources keyed by the active query — local
//! peers/contacts (single emission), global peer search, and message search
//! (both debounced with a loading placeholder) — into one ordered, sectioned
//! row list. Rebuilt lists are diffed against the previous list on the
//! preparation queue and applied in sequence order, so overlapping query
//! updates serialize instead of racing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::config::SearchConfig;
use crate::diff::{self, PreparationQueue, Transition};
use crate::protocol::{Message, MessageRecord, PeerId, PeerRecord, SearchMessage};
use crate::search::entry::{
    SearchEntry, SearchEntryId, SectionLabel, SeparatorState, GLOBAL_SECTION_BASE,
    LOCAL_SECTION_BASE, MESSAGE_SECTION_BASE,
};
use crate::search::recent::RecentSearchStore;

/// Label a query must prefix to surface the saved-messages row.
const SAVED_MESSAGES_LABEL: &str = "saved messages";

/// Backend search surfaces consumed by the aggregator.
pub trait SearchSources: Send + Sync {
    /// Local peer/contact match; effectively synchronous.
    fn search_local_peers(&self, query: &str) -> Vec<PeerRecord>;

    /// Global directory search; invoked after the debounce delay.
    fn search_global_peers(&self, query: &str) -> Vec<PeerRecord>;

    /// Full-text message search; invoked after the debounce delay.
    fn search_messages(&self, query: &str) -> Vec<MessageRecord>;

    /// Frequently contacted peers for empty-query mode.
    fn popular_peers(&self) -> Vec<PeerRecord>;

    /// The local account's saved-messages peer.
    fn saved_messages_peer(&self) -> PeerRecord;
}

/// Host-facing handle to a running search aggregator.
pub struct SearchHandle {
    bus: Sender<Message>,
    rows: Arc<Mutex<Vec<SearchEntry>>>,
    loading: Arc<AtomicBool>,
}

impl SearchHandle {
    pub fn subscribe(&self) -> Receiver<Message> {
        self.bus.subscribe()
    }

    /// Replaces the active query; `None` enters empty-query mode.
    pub fn set_query(&self, query: Option<String>) {
        self.send(SearchMessage::SetQuery(query));
    }

    /// Activates a rendered row.
    pub fn select(&self, id: SearchEntryId, by_click: bool) {
        self.send(SearchMessage::Select { id, by_click });
    }

    pub fn remove_recent(&self, peer: PeerId) {
        self.send(SearchMessage::RemoveRecent(peer));
    }

    pub fn clear_recent(&self) {
        self.send(SearchMessage::ClearRecent);
    }

    pub fn shutdown(&self) {
        self.send(SearchMessage::Shutdown);
    }

    /// Snapshot of the live row list.
    pub fn rows(&self) -> Vec<SearchEntry> {
        self.rows.lock().expect("search rows poisoned").clone()
    }

    /// True while any debounced source still owes its first real result.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    fn send(&self, message: SearchMessage) {
        let _ = self.bus.send(Message::Search(message));
    }
}

/// Owns the merged row list and the per-query source state.
pub struct SearchController {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    sources: Arc<dyn SearchSources>,
    recent: Arc<dyn RecentSearchStore>,
    prepare: PreparationQueue,
    config: SearchConfig,

    rows: Arc<Mutex<Vec<SearchEntry>>>,
    loading_flag: Arc<AtomicBool>,

    query: Option<String>,
    query_generation: u64,
    local_peers: Vec<PeerRecord>,
    saved: Option<PeerRecord>,
    global_peers: Option<Vec<PeerRecord>>,
    message_hits: Option<Vec<MessageRecord>>,
    popular: Vec<PeerRecord>,
    recent_peers: Vec<PeerRecord>,
    popular_expanded: bool,
    last_entries: Option<Vec<SearchEntry>>,
    next_seq: u64,
    applied_seq: u64,
    is_loading: bool,
}

impl SearchController {
    /// Spawns the aggregator thread; it starts in empty-query mode.
    pub fn spawn(
        sources: Arc<dyn SearchSources>,
        recent: Arc<dyn RecentSearchStore>,
        prepare: PreparationQueue,
        config: SearchConfig,
        bus: Sender<Message>,
    ) -> SearchHandle {
        let bus_consumer = bus.subscribe();
        let rows = Arc::new(Mutex::new(Vec::new()));
        let loading_flag = Arc::new(AtomicBool::new(false));
        let mut controller = SearchController {
            bus_consumer,
            bus_producer: bus.clone(),
            sources,
            recent,
            prepare,
            config,
            rows: Arc::clone(&rows),
            loading_flag: Arc::clone(&loading_flag),
            query: None,
            query_generation: 0,
            local_peers: Vec::new(),
            saved: None,
            global_peers: None,
            message_hits: None,
            popular: Vec::new(),
            recent_peers: Vec::new(),
            popular_expanded: false,
            last_entries: None,
            next_seq: 0,
            applied_seq: 0,
            is_loading: false,
        };
        thread::Builder::new()
            .name("search-aggregator".to_string())
            .spawn(move || controller.run())
            .expect("failed to spawn search aggregator");
        SearchHandle {
            bus,
            rows,
            loading: loading_flag,
        }
    }

    /// Drains the bus until shutdown.
    pub fn run(&mut self) {
        self.apply_query(None);
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Search(message)) => {
                    if !self.handle_message(message) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SearchController: bus lagged, skipped {skipped} messages");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("SearchController: shut down");
    }

    fn handle_message(&mut self, message: SearchMessage) -> bool {
        match message {
            SearchMessage::SetQuery(query) => self.apply_query(query),
            SearchMessage::Select { id, by_click } => self.handle_select(id, by_click),
            SearchMessage::RemoveRecent(peer) => {
                self.recent.remove(peer);
                self.refresh_recent();
            }
            SearchMessage::ClearRecent => {
                self.recent.clear();
                self.refresh_recent();
            }
            SearchMessage::Shutdown => return false,
            SearchMessage::LocalPeers {
                generation,
                peers,
                saved,
            } => {
                if generation == self.query_generation {
                    self.local_peers = peers;
                    self.saved = saved;
                    self.rebuild();
                }
            }
            SearchMessage::GlobalPeers { generation, peers } => {
                if generation == self.query_generation {
                    self.global_peers = Some(peers);
                    self.rebuild();
                }
            }
            SearchMessage::MessageHits {
                generation,
                messages,
            } => {
                if generation == self.query_generation {
                    self.message_hits = Some(messages);
                    self.rebuild();
                }
            }
            SearchMessage::EmptyModePeers {
                generation,
                popular,
                recent,
            } => {
                if generation == self.query_generation {
                    self.popular = popular;
                    self.recent_peers = recent;
                    self.rebuild();
                }
            }
            SearchMessage::TransitionReady {
                seq,
                transition,
                is_loading,
            } => self.apply_transition(seq, transition, is_loading),
            // Own notifications echo back through the bus.
            _ => {}
        }
        true
    }

    // ------------------------------------------------------------------
    // Query dispatch
    // ------------------------------------------------------------------

    fn apply_query(&mut self, query: Option<String>) {
        let normalized = query.filter(|q| !q.is_empty());
        self.query_generation += 1;
        let generation = self.query_generation;
        self.query = normalized.clone();

        self.local_peers.clear();
        self.saved = None;
        self.global_peers = None;
        self.message_hits = None;

        match normalized {
            Some(query) => {
                debug!("SearchController: query {query:?} generation {generation}");
                let sources = Arc::clone(&self.sources);
                let bus = self.bus_producer.clone();
                let local_query = query.clone();
                thread::spawn(move || {
                    let peers = sources.search_local_peers(&local_query);
                    let saved = if SAVED_MESSAGES_LABEL.starts_with(&local_query.to_lowercase()) {
                        Some(sources.saved_messages_peer())
                    } else {
                        None
                    };
                    let _ = bus.send(Message::Search(SearchMessage::LocalPeers {
                        generation,
                        peers,
                        saved,
                    }));
                });

                let sources = Arc::clone(&self.sources);
                let bus = self.bus_producer.clone();
                let global_query = query.clone();
                let debounce = Duration::from_millis(self.config.remote_debounce_ms);
                thread::spawn(move || {
                    thread::sleep(debounce);
                    let peers = sources.search_global_peers(&global_query);
                    let _ = bus.send(Message::Search(SearchMessage::GlobalPeers {
                        generation,
                        peers,
                    }));
                });

                let sources = Arc::clone(&self.sources);
                let bus = self.bus_producer.clone();
                let debounce = Duration::from_millis(self.config.remote_debounce_ms);
                thread::spawn(move || {
                    thread::sleep(debounce);
                    let messages = sources.search_messages(&query);
                    let _ = bus.send(Message::Search(SearchMessage::MessageHits {
                        generation,
                        messages,
                    }));
                });
            }
            None => {
                let sources = Arc::clone(&self.sources);
                let recent = Arc::clone(&self.recent);
                let bus = self.bus_producer.clone();
                thread::spawn(move || {
                    let popular = sources.popular_peers();
                    let recent = recent.list();
                    let _ = bus.send(Message::Search(SearchMessage::EmptyModePeers {
                        generation,
                        popular,
                        recent,
                    }));
                });
            }
        }
        self.rebuild();
    }

    fn refresh_recent(&mut self) {
        if self.query.is_none() {
            self.recent_peers = self.recent.list();
            self.rebuild();
        }
    }

    // ------------------------------------------------------------------
    // Merge pipeline
    // ------------------------------------------------------------------

    fn loading(&self) -> bool {
        self.query.is_some() && (self.global_peers.is_none() || self.message_hits.is_none())
    }

    fn rebuild(&mut self) {
        let entries = self.build_entries();
        let is_loading = self.loading();
        let previous = self.last_entries.replace(entries.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        let bus = self.bus_producer.clone();
        self.prepare.submit(move || {
            let transition = diff::diff(previous.as_deref(), &entries, SearchEntry::clone);
            let _ = bus.send(Message::Search(SearchMessage::TransitionReady {
                seq,
                transition,
                is_loading,
            }));
        });
    }

    fn apply_transition(
        &mut self,
        seq: u64,
        transition: Transition<SearchEntry>,
        is_loading: bool,
    ) {
        if seq != self.applied_seq {
            warn!(
                "SearchController: dropping out-of-order transition seq={seq} expected={}",
                self.applied_seq
            );
            return;
        }
        self.applied_seq += 1;

        {
            let mut rows = self.rows.lock().expect("search rows poisoned");
            transition.apply(&mut rows);
        }
        let _ = self
            .bus_producer
            .send(Message::Search(SearchMessage::Applied { transition }));

        if is_loading != self.is_loading {
            self.is_loading = is_loading;
            self.loading_flag.store(is_loading, Ordering::Relaxed);
            let _ = self
                .bus_producer
                .send(Message::Search(SearchMessage::LoadingChanged(is_loading)));
        }
    }

    // ------------------------------------------------------------------
    // Entry building
    // ------------------------------------------------------------------

    fn build_entries(&self) -> Vec<SearchEntry> {
        match self.query {
            Some(_) => self.build_query_entries(),
            None => self.build_empty_entries(),
        }
    }

    fn build_query_entries(&self) -> Vec<SearchEntry> {
        let mut entries = Vec::new();
        let mut seen: HashSet<PeerId> = HashSet::new();

        let mut local_group = Vec::new();
        if let Some(saved) = &self.saved {
            seen.insert(saved.id);
            local_group.push(SearchEntry::SavedMessages(saved.clone()));
        }
        let mut index = LOCAL_SECTION_BASE + 1;
        for peer in &self.local_peers {
            if seen.insert(peer.id) {
                local_group.push(SearchEntry::LocalPeer {
                    peer: peer.clone(),
                    index,
                });
                index += 1;
            }
        }
        if !local_group.is_empty() {
            entries.push(SearchEntry::Separator {
                section: SectionLabel::ChatsAndContacts,
                index: LOCAL_SECTION_BASE,
                state: SeparatorState::None,
            });
            entries.extend(local_group);
        }

        if let Some(global) = &self.global_peers {
            let mut group = Vec::new();
            let mut index = GLOBAL_SECTION_BASE + 1;
            for peer in global {
                // Peers already surfaced by the local group are suppressed.
                if seen.insert(peer.id) {
                    group.push(SearchEntry::GlobalPeer {
                        peer: peer.clone(),
                        index,
                    });
                    index += 1;
                }
            }
            if !group.is_empty() {
                entries.push(SearchEntry::Separator {
                    section: SectionLabel::GlobalSearch,
                    index: GLOBAL_SECTION_BASE,
                    state: SeparatorState::None,
                });
                entries.extend(group);
            }
        }

        if let Some(hits) = &self.message_hits {
            let mut group = Vec::new();
            let mut index = MESSAGE_SECTION_BASE + 1;
            for message in hits {
                group.push(SearchEntry::MessageHit {
                    message: message.clone(),
                    index,
                });
                index += 1;
            }
            if !group.is_empty() {
                entries.push(SearchEntry::Separator {
                    section: SectionLabel::Messages,
                    index: MESSAGE_SECTION_BASE,
                    state: SeparatorState::None,
                });
                entries.extend(group);
            }
        }

        if entries.is_empty() && self.global_peers.is_some() && self.message_hits.is_some() {
            entries.push(SearchEntry::EmptySearch);
        }
        entries
    }

    fn build_empty_entries(&self) -> Vec<SearchEntry> {
        let mut entries = Vec::new();
        let mut seen: HashSet<PeerId> = HashSet::new();
        let mut index = 0i64;

        let popular_ids: HashSet<PeerId> = self.popular.iter().map(|peer| peer.id).collect();
        let recent_pool: Vec<&PeerRecord> = self
            .recent_peers
            .iter()
            .filter(|peer| !popular_ids.contains(&peer.id))
            .collect();

        if !self.popular.is_empty() {
            entries.push(SearchEntry::Separator {
                section: SectionLabel::Popular,
                index,
                state: if self.popular_expanded {
                    SeparatorState::All
                } else {
                    SeparatorState::Short
                },
            });
            index += 1;
        }
        let mut shown = 0usize;
        for peer in &self.popular {
            if seen.insert(peer.id) {
                let stop = !self.popular_expanded
                    && shown + 1 == self.config.popular_collapsed_limit
                    && !recent_pool.is_empty();
                entries.push(SearchEntry::LocalPeer {
                    peer: peer.clone(),
                    index,
                });
                index += 1;
                shown += 1;
                if stop {
                    break;
                }
            }
        }

        if !recent_pool.is_empty() {
            entries.push(SearchEntry::Separator {
                section: SectionLabel::Recent,
                index,
                state: SeparatorState::Clear,
            });
            index += 1;
            for peer in recent_pool {
                if seen.insert(peer.id) {
                    entries.push(SearchEntry::RecentPeer {
                        peer: peer.clone(),
                        index,
                    });
                    index += 1;
                }
            }
        }
        entries
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn handle_select(&mut self, id: SearchEntryId, by_click: bool) {
        match id {
            SearchEntryId::Separator(index) => self.handle_separator_select(index),
            SearchEntryId::EmptySearch => {}
            SearchEntryId::Message(message_id) => {
                let _ = self.bus_producer.send(Message::Search(SearchMessage::Open {
                    peer: message_id.peer,
                    message: Some(message_id),
                    by_click,
                }));
            }
            SearchEntryId::SavedMessages
            | SearchEntryId::LocalPeer(_)
            | SearchEntryId::SecretChat(_)
            | SearchEntryId::RecentPeer(_)
            | SearchEntryId::GlobalPeer(_) => {
                let Some(record) = self.find_peer_record(&id) else {
                    return;
                };
                // Peer hits picked during an active query feed the
                // recently-searched list.
                if self.query.is_some() {
                    self.recent.add(record.clone());
                }
                let _ = self.bus_producer.send(Message::Search(SearchMessage::Open {
                    peer: record.id,
                    message: None,
                    by_click,
                }));
            }
        }
    }

    fn handle_separator_select(&mut self, index: i64) {
        let state = self.rows().iter().find_map(|entry| match entry {
            SearchEntry::Separator {
                index: entry_index,
                state,
                ..
            } if *entry_index == index => Some(*state),
            _ => None,
        });
        match state {
            Some(SeparatorState::Short) => {
                self.popular_expanded = true;
                self.rebuild();
            }
            Some(SeparatorState::All) => {
                self.popular_expanded = false;
                self.rebuild();
            }
            Some(SeparatorState::Clear) => {
                self.recent.clear();
                self.refresh_recent();
            }
            _ => {}
        }
    }

    fn find_peer_record(&self, id: &SearchEntryId) -> Option<PeerRecord> {
        self.rows().into_iter().find_map(|entry| {
            if entry.stable_id() != *id {
                return None;
            }
            match entry {
                SearchEntry::SavedMessages(peer)
                | SearchEntry::LocalPeer { peer, .. }
                | SearchEntry::RecentPeer { peer, .. }
                | SearchEntry::GlobalPeer { peer, .. } => Some(peer),
                _ => None,
            }
        })
    }

    fn rows(&self) -> Vec<SearchEntry> {
        self.rows.lock().expect("search rows poisoned").clone()
    }
}
