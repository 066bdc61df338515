//! Queue controller: the playlist state machine and playback session driver.
//!
//! One controller owns the live item collection, the current-index pointer,
//! the external player, the fetch subscription, and the progress timer. All
//! of that state is mutated on the controller's own thread, which drains a
//! broadcast bus; workers (history watcher, diff preparation, fetch
//! forwarder, progress timer) deliver their results back as bus messages
//! tagged with generations so stale deliveries are dropped.
//!
//! Items are stored in ascending chronological order: index 0 is the oldest
//! entry, the last index the newest. Traversal runs toward older items, so
//! `next` decrements the pointer and wraps from 0 to the last index.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

use crate::config::PlaybackConfig;
use crate::diff::{self, PreparationQueue, Transition};
use crate::fetch::{ContentStore, FetchSubscription, ResourceStatus};
use crate::player::{ExternalPlayer, PlayerBackend, PlayerEvent, PlayerEventSink};
use crate::protocol::{
    HistoryLocation, MediaFilter, Message, MessageId, MessageOrd, PeerId, QueueMessage, RepeatMode,
    SingleTrack,
};
use crate::queue::entry::{EntryId, QueueEntry};
use crate::queue::history::{entries_from_records, HistorySource};
use crate::queue::item::{PlaybackSnapshot, PlaybackState, QueueItem};
use crate::queue::session;

/// Capability interface notified of queue and playback changes.
///
/// Implementations are stored weakly; an expired listener is skipped and
/// pruned on the next notification pass. Delivery is synchronous on the
/// controller thread in registration order.
pub trait QueueListener: Send + Sync {
    fn item_changed(&self, _item: &QueueItem) {}
    fn state_changed(&self, _item: &QueueItem) {}
    fn started_playing(&self, _item: &QueueItem) {}
    fn stopped_playing(&self, _item: &QueueItem) {}
    fn timebase_changed(&self, _item: &QueueItem) {}
    fn queue_completed(&self) {}
}

#[derive(Default)]
struct ListenerRegistry {
    listeners: Mutex<Vec<Weak<dyn QueueListener>>>,
}

impl ListenerRegistry {
    fn add(&self, listener: Weak<dyn QueueListener>) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push(listener);
    }

    fn remove(&self, target: *const ()) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .retain(|weak| match weak.upgrade() {
                Some(listener) => !std::ptr::eq(Arc::as_ptr(&listener) as *const (), target),
                None => false,
            });
    }

    fn clear(&self) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .clear();
    }

    fn notify(&self, mut apply: impl FnMut(&dyn QueueListener)) {
        let alive: Vec<Arc<dyn QueueListener>> = {
            let mut listeners = self.listeners.lock().expect("listener registry poisoned");
            listeners.retain(|weak| weak.upgrade().is_some());
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        // Callbacks run outside the lock so a listener may re-register.
        for listener in alive {
            apply(listener.as_ref());
        }
    }
}

/// Traversal and side-effect policy for one controller flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Wrap from the oldest item back to the newest when traversal ends.
    pub loop_queue: bool,
    /// Advance to the next item when the current one finishes.
    pub auto_advance: bool,
    /// Mark dequeued messages consumed.
    pub mark_consumed: bool,
}

impl QueuePolicy {
    /// Shared-music queues loop endlessly.
    pub fn music() -> Self {
        Self {
            loop_queue: true,
            auto_advance: true,
            mark_consumed: false,
        }
    }

    /// Voice queues complete at the traversal end and mark consumption.
    pub fn voice() -> Self {
        Self {
            loop_queue: false,
            auto_advance: true,
            mark_consumed: true,
        }
    }

    /// One-off tracks neither loop nor advance.
    pub fn single() -> Self {
        Self {
            loop_queue: false,
            auto_advance: false,
            mark_consumed: false,
        }
    }
}

/// Marks voice/video messages consumed when they are dequeued.
pub trait ConsumptionTracker: Send + Sync {
    fn mark_consumed(&self, message: MessageId);
}

/// Read-only view of the live collection shape.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub items: Vec<Arc<QueueItem>>,
    pub current_index: Option<usize>,
    pub repeat: RepeatMode,
    /// Whether the first transition has been applied.
    pub ready: bool,
}

/// Collaborators required to run a queue controller.
pub struct QueueDeps {
    pub store: Arc<dyn ContentStore>,
    pub backend: Arc<dyn PlayerBackend>,
    pub consumption: Option<Arc<dyn ConsumptionTracker>>,
    pub prepare: PreparationQueue,
    pub config: PlaybackConfig,
}

/// Host-facing handle to a running queue controller.
///
/// Commands are delivered through the bus and execute on the controller
/// thread; state reads return snapshots, never the live collection.
pub struct QueueHandle {
    session: Uuid,
    bus: Sender<Message>,
    listeners: Arc<ListenerRegistry>,
    snapshot: Arc<Mutex<QueueSnapshot>>,
}

impl QueueHandle {
    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn subscribe(&self) -> Receiver<Message> {
        self.bus.subscribe()
    }

    /// Resumes playback of a paused track.
    pub fn play(&self) {
        self.send(QueueMessage::Play);
    }

    pub fn pause(&self) {
        self.send(QueueMessage::Pause);
    }

    pub fn play_or_pause(&self) {
        self.send(QueueMessage::PlayOrPause);
    }

    pub fn stop(&self) {
        self.send(QueueMessage::Stop);
    }

    /// Advances toward older items.
    pub fn next(&self) {
        self.send(QueueMessage::Next);
    }

    /// Advances toward newer items.
    pub fn previous(&self) {
        self.send(QueueMessage::Previous);
    }

    pub fn toggle_repeat(&self) {
        self.send(QueueMessage::ToggleRepeat);
    }

    /// Scrubs to a fraction of the current track's duration.
    pub fn set_progress(&self, fraction: f32) {
        self.send(QueueMessage::Seek(fraction));
    }

    pub fn shutdown(&self) {
        self.send(QueueMessage::Shutdown);
    }

    pub fn add_listener<L: QueueListener + 'static>(&self, listener: &Arc<L>) {
        let arc: Arc<dyn QueueListener> = listener.clone();
        let weak: Weak<dyn QueueListener> = Arc::downgrade(&arc);
        self.listeners.add(weak);
    }

    pub fn remove_listener<L: QueueListener + 'static>(&self, listener: &Arc<L>) {
        self.listeners
            .remove(Arc::as_ptr(listener) as *const ());
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot
            .lock()
            .expect("queue snapshot poisoned")
            .clone()
    }

    /// Item under the current-index pointer, when valid and in range.
    pub fn current_item(&self) -> Option<Arc<QueueItem>> {
        let snapshot = self.snapshot();
        snapshot
            .current_index
            .and_then(|index| snapshot.items.get(index).cloned())
    }

    pub fn next_enabled(&self) -> bool {
        self.snapshot().items.len() > 1
    }

    pub fn prev_enabled(&self) -> bool {
        self.snapshot().items.len() > 1
    }

    /// Whether this controller still holds the global playback slot.
    pub fn is_active(&self) -> bool {
        session::is_active(self.session)
    }

    fn send(&self, message: QueueMessage) {
        let _ = self.bus.send(Message::Queue(message));
    }
}

/// Owns the queue state machine and the playback session.
pub struct QueueController {
    session: Uuid,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    listeners: Arc<ListenerRegistry>,
    snapshot: Arc<Mutex<QueueSnapshot>>,
    policy: QueuePolicy,
    config: PlaybackConfig,
    store: Arc<dyn ContentStore>,
    backend: Arc<dyn PlayerBackend>,
    consumption: Option<Arc<dyn ConsumptionTracker>>,
    prepare: PreparationQueue,

    items: Vec<Arc<QueueItem>>,
    last_entries: Option<Vec<QueueEntry>>,
    current: Option<usize>,
    repeat: RepeatMode,
    song: Option<Arc<QueueItem>>,
    player: Option<Box<dyn ExternalPlayer>>,
    player_generation: u64,
    fetch_subscription: Option<FetchSubscription>,
    fetch_generation: u64,
    timer_generation: u64,
    timer_stop: Option<Arc<AtomicBool>>,
    next_seq: u64,
    applied_seq: u64,
    history_generation: u64,
    start_position: Option<MessageOrd>,
    ready: bool,
}

impl QueueController {
    /// Spawns a controller over a peer's shared music.
    pub fn chat_music(
        deps: QueueDeps,
        history: Arc<dyn HistorySource>,
        bus: Sender<Message>,
        peer: PeerId,
        position: Option<MessageOrd>,
    ) -> QueueHandle {
        Self::spawn_chat(
            deps,
            history,
            bus,
            peer,
            position,
            MediaFilter::Music,
            QueuePolicy::music(),
        )
    }

    /// Spawns a controller over a peer's voice and video messages.
    pub fn chat_voice(
        deps: QueueDeps,
        history: Arc<dyn HistorySource>,
        bus: Sender<Message>,
        peer: PeerId,
        position: Option<MessageOrd>,
    ) -> QueueHandle {
        Self::spawn_chat(
            deps,
            history,
            bus,
            peer,
            position,
            MediaFilter::VoiceOrVideoMessage,
            QueuePolicy::voice(),
        )
    }

    /// Spawns a controller playing one injected track.
    pub fn single(deps: QueueDeps, bus: Sender<Message>, track: SingleTrack) -> QueueHandle {
        let (handle, mut controller) = Self::build(deps, bus, QueuePolicy::single(), None);
        controller.submit_entries(vec![QueueEntry::Single(track)]);
        thread::Builder::new()
            .name("queue-controller".to_string())
            .spawn(move || controller.run())
            .expect("failed to spawn queue controller");
        handle
    }

    fn spawn_chat(
        deps: QueueDeps,
        history: Arc<dyn HistorySource>,
        bus: Sender<Message>,
        peer: PeerId,
        position: Option<MessageOrd>,
        filter: MediaFilter,
        policy: QueuePolicy,
    ) -> QueueHandle {
        let (handle, controller) = Self::build(deps, bus, policy, position);

        let location = position
            .map(HistoryLocation::Around)
            .unwrap_or(HistoryLocation::Initial);
        let view = history.view(peer, location, controller.config.history_window, filter);
        let generation = controller.history_generation;
        let watcher_bus = controller.bus_producer.clone();
        thread::Builder::new()
            .name("history-watcher".to_string())
            .spawn(move || {
                while let Ok(records) = view.recv() {
                    let delivered = watcher_bus.send(Message::Queue(QueueMessage::HistoryWindow {
                        generation,
                        records,
                    }));
                    if delivered.is_err() {
                        return;
                    }
                }
            })
            .expect("failed to spawn history watcher");

        let mut controller = controller;
        thread::Builder::new()
            .name("queue-controller".to_string())
            .spawn(move || controller.run())
            .expect("failed to spawn queue controller");
        handle
    }

    fn build(
        deps: QueueDeps,
        bus: Sender<Message>,
        policy: QueuePolicy,
        start_position: Option<MessageOrd>,
    ) -> (QueueHandle, QueueController) {
        let bus_consumer = bus.subscribe();
        let session = Uuid::new_v4();
        let listeners = Arc::new(ListenerRegistry::default());
        let snapshot = Arc::new(Mutex::new(QueueSnapshot {
            items: Vec::new(),
            current_index: None,
            repeat: RepeatMode::Off,
            ready: false,
        }));

        // Take over the global playback slot before any playback work.
        session::activate(session, bus.clone());
        info!("QueueController: session {session} started");

        let controller = QueueController {
            session,
            bus_consumer,
            bus_producer: bus.clone(),
            listeners: Arc::clone(&listeners),
            snapshot: Arc::clone(&snapshot),
            policy,
            config: deps.config,
            store: deps.store,
            backend: deps.backend,
            consumption: deps.consumption,
            prepare: deps.prepare,
            items: Vec::new(),
            last_entries: None,
            current: None,
            repeat: RepeatMode::Off,
            song: None,
            player: None,
            player_generation: 0,
            fetch_subscription: None,
            fetch_generation: 0,
            timer_generation: 0,
            timer_stop: None,
            next_seq: 0,
            applied_seq: 0,
            history_generation: 0,
            start_position,
            ready: false,
        };
        let handle = QueueHandle {
            session,
            bus,
            listeners,
            snapshot,
        };
        (handle, controller)
    }

    /// Drains the bus until shutdown or deactivation.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Queue(message)) => {
                    if !self.handle_message(message) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("QueueController: bus lagged, skipped {skipped} messages");
                }
                Err(RecvError::Closed) => break,
            }
        }
        self.teardown();
    }

    fn handle_message(&mut self, message: QueueMessage) -> bool {
        match message {
            QueueMessage::Play => self.play(),
            QueueMessage::Pause => self.pause(),
            QueueMessage::PlayOrPause => self.play_or_pause(),
            QueueMessage::Stop => self.stop_playback(),
            QueueMessage::Next => self.next(),
            QueueMessage::Previous => self.prev(),
            QueueMessage::ToggleRepeat => self.toggle_repeat(),
            QueueMessage::Seek(fraction) => self.set_progress(fraction),
            QueueMessage::Shutdown => return false,
            QueueMessage::Deactivate { session } => {
                if session == self.session {
                    info!("QueueController: session {session} superseded");
                    return false;
                }
            }
            QueueMessage::HistoryWindow {
                generation,
                records,
            } => {
                if generation == self.history_generation {
                    self.submit_entries(entries_from_records(&records));
                }
            }
            QueueMessage::TransitionReady { seq, transition } => {
                self.apply_transition(seq, transition);
            }
            QueueMessage::ResourceFetching {
                generation,
                progress,
            } => self.handle_resource_fetching(generation, progress),
            QueueMessage::ResourceReady { generation, path } => {
                self.handle_resource_ready(generation, path);
            }
            QueueMessage::Player { generation, event } => {
                if generation == self.player_generation {
                    self.handle_player_event(event);
                }
            }
            QueueMessage::ProgressTick { generation } => self.handle_progress_tick(generation),
            // Own notifications echo back through the bus.
            _ => {}
        }
        true
    }

    // ------------------------------------------------------------------
    // Merge pipeline
    // ------------------------------------------------------------------

    fn submit_entries(&mut self, entries: Vec<QueueEntry>) {
        let previous = self.last_entries.replace(entries.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        let bus = self.bus_producer.clone();
        self.prepare.submit(move || {
            let transition = diff::diff(previous.as_deref(), &entries, |entry| {
                Arc::new(QueueItem::new(entry.clone()))
            });
            let _ = bus.send(Message::Queue(QueueMessage::TransitionReady {
                seq,
                transition,
            }));
        });
    }

    fn apply_transition(&mut self, seq: u64, transition: Transition<Arc<QueueItem>>) {
        if seq != self.applied_seq {
            warn!(
                "QueueController: dropping out-of-order transition seq={seq} expected={}",
                self.applied_seq
            );
            return;
        }
        self.applied_seq += 1;
        self.merge(transition);
    }

    fn merge(&mut self, transition: Transition<Arc<QueueItem>>) {
        let previous = self.items.clone();
        transition.apply(&mut self.items);

        if let Some(current) = self.current {
            if current > 0 && current < previous.len() {
                let previous_id = previous[current].stable_id();
                let found = self
                    .items
                    .iter()
                    .position(|item| item.stable_id() == previous_id);
                match found {
                    Some(index) => self.current = Some(index),
                    None => {
                        if self.items.is_empty() {
                            self.current = None;
                            self.stop_playback();
                            self.complete();
                        } else {
                            // The pointed-at item vanished; its slot now
                            // holds the next-older entry. Advance there.
                            let fallback = current.min(self.items.len() - 1);
                            self.current = Some(fallback);
                            self.dequeue_current();
                        }
                    }
                }
            }
            // The pointer may still be stale after a structural shrink.
            if let Some(current) = self.current {
                if current >= self.items.len() {
                    self.current = if self.items.is_empty() {
                        None
                    } else {
                        Some(self.items.len() - 1)
                    };
                }
            }
        }

        if !self.ready {
            self.ready = true;
            if let Some(position) = self.start_position.take() {
                let found = self
                    .items
                    .iter()
                    .position(|item| item.entry().sort_key() == position);
                if let Some(index) = found {
                    self.current = Some(index);
                }
            }
            if self.current.is_none() && !self.items.is_empty() {
                self.current = Some(0);
            }
            self.dequeue_current();
            let _ = self.bus_producer.send(Message::Queue(QueueMessage::Ready));
        }

        self.publish_queue_changed();
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    fn next_enabled(&self) -> bool {
        self.items.len() > 1
    }

    fn prev_enabled(&self) -> bool {
        self.items.len() > 1
    }

    /// Whether the pointer sits on the final item of the traversal order.
    fn at_queue_end(&self) -> bool {
        self.current == Some(0)
    }

    fn next(&mut self) {
        if !self.next_enabled() {
            return;
        }
        let current = self.current.unwrap_or(0);
        self.current = Some(if current == 0 {
            self.items.len() - 1
        } else {
            current - 1
        });
        self.dequeue_current();
        self.publish_queue_changed();
    }

    fn prev(&mut self) {
        if !self.prev_enabled() {
            return;
        }
        let current = self.current.unwrap_or(0);
        self.current = Some(if current == self.items.len() - 1 {
            0
        } else {
            current + 1
        });
        self.dequeue_current();
        self.publish_queue_changed();
    }

    fn toggle_repeat(&mut self) {
        self.repeat = match self.repeat {
            RepeatMode::Off => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::Off,
        };
        let _ = self
            .bus_producer
            .send(Message::Queue(QueueMessage::RepeatModeChanged(self.repeat)));
        self.publish_queue_changed();
    }

    fn current_item(&self) -> Option<Arc<QueueItem>> {
        self.current.and_then(|index| self.items.get(index).cloned())
    }

    // ------------------------------------------------------------------
    // Playback session
    // ------------------------------------------------------------------

    fn dequeue_current(&mut self) {
        let Some(item) = self.current_item() else {
            return;
        };
        if !item.is_playable() {
            debug!("QueueController: skipping non-playable entry under pointer");
            return;
        }
        self.set_song(Arc::clone(&item));
        self.notify_item_changed(&item);
        if self.policy.mark_consumed {
            if let (Some(consumption), QueueEntry::Track(record)) =
                (self.consumption.as_ref(), item.entry())
            {
                consumption.mark_consumed(record.id);
            }
        }
        self.play_item(item);
    }

    fn set_song(&mut self, item: Arc<QueueItem>) {
        self.stop_playback();
        if item.set_state(PlaybackState::Waiting) {
            self.notify_state_changed(&item);
        }
        self.song = Some(item);
    }

    fn play_item(&mut self, item: Arc<QueueItem>) {
        let profile = item.profile().clone();
        self.fetch_generation += 1;
        let generation = self.fetch_generation;

        // Replacing the subscription cancels any prior in-flight fetch.
        self.fetch_subscription = Some(self.store.fetch(&profile.resource));

        let status = self.store.resource_status(&profile.resource);
        let store = Arc::clone(&self.store);
        let bus = self.bus_producer.clone();
        let resource = profile.resource.clone();
        thread::Builder::new()
            .name("fetch-forwarder".to_string())
            .spawn(move || {
                while let Ok(update) = status.recv() {
                    match update {
                        ResourceStatus::Fetching { progress } => {
                            let delivered =
                                bus.send(Message::Queue(QueueMessage::ResourceFetching {
                                    generation,
                                    progress,
                                }));
                            if delivered.is_err() {
                                return;
                            }
                        }
                        ResourceStatus::Local => {
                            let data = store.resource_data(&resource);
                            while let Ok(snapshot) = data.recv() {
                                if snapshot.complete {
                                    let _ =
                                        bus.send(Message::Queue(QueueMessage::ResourceReady {
                                            generation,
                                            path: snapshot.path,
                                        }));
                                    return;
                                }
                            }
                            return;
                        }
                        ResourceStatus::Remote => {}
                    }
                }
            })
            .expect("failed to spawn fetch forwarder");
    }

    fn handle_resource_fetching(&mut self, generation: u64, progress: f32) {
        if generation != self.fetch_generation {
            return;
        }
        let Some(song) = self.song.clone() else {
            return;
        };
        let changed = song.set_state(PlaybackState::Fetching {
            progress,
            interactive: true,
        });
        if changed {
            self.notify_state_changed(&song);
        }
    }

    fn handle_resource_ready(&mut self, generation: u64, path: PathBuf) {
        if generation != self.fetch_generation {
            return;
        }
        if self.song.is_none() {
            return;
        }
        self.player_generation += 1;
        let sink = PlayerEventSink::new(self.bus_producer.clone(), self.player_generation);
        match self.backend.open(&path, sink) {
            Ok(player) => {
                self.player = Some(player);
                if let Some(player) = self.player.as_mut() {
                    player.play();
                }
            }
            Err(err) => error!("QueueController: {err}"),
        }
    }

    fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Started => self.player_did_start(),
            PlayerEvent::Finished => self.player_did_finish(),
            PlayerEvent::Paused => self.player_did_pause(),
            PlayerEvent::TimebaseChanged => {
                if let Some(song) = self.song.clone() {
                    self.notify_timebase_changed(&song);
                }
            }
        }
    }

    fn player_did_start(&mut self) {
        let Some(song) = self.song.clone() else {
            return;
        };
        let (position, duration) = self.player_times();
        if song.set_state(PlaybackState::Playing(PlaybackSnapshot::new(
            position, duration, false,
        ))) {
            self.notify_state_changed(&song);
        }
        self.notify_started_playing(&song);
        self.start_timer();
        if duration == 0.0 {
            // Degenerate media counts as fully played.
            self.player_did_finish();
        }
    }

    fn player_did_finish(&mut self) {
        self.stop_playback();
        if self.repeat == RepeatMode::Track {
            self.dequeue_current();
        } else if self.policy.auto_advance && self.next_enabled() {
            if self.at_queue_end() {
                if self.policy.loop_queue {
                    self.next();
                } else {
                    self.complete();
                }
            } else {
                self.next();
            }
        } else {
            self.complete();
        }
    }

    fn player_did_pause(&mut self) {
        let Some(song) = self.song.clone() else {
            return;
        };
        let (position, duration) = self.player_times();
        if song.set_state(PlaybackState::Paused(PlaybackSnapshot::new(
            position, duration, false,
        ))) {
            self.notify_state_changed(&song);
        }
        self.stop_timer();
    }

    fn play(&mut self) {
        if let Some(song) = &self.song {
            if matches!(song.state(), PlaybackState::Paused(_)) {
                if let Some(player) = self.player.as_mut() {
                    player.play();
                }
            }
        }
    }

    fn pause(&mut self) {
        if let Some(song) = &self.song {
            if matches!(song.state(), PlaybackState::Playing(_)) {
                if let Some(player) = self.player.as_mut() {
                    player.pause();
                }
            }
        }
    }

    fn play_or_pause(&mut self) {
        let Some(song) = self.song.clone() else {
            return;
        };
        match song.state() {
            PlaybackState::Playing(_) => {
                if let Some(player) = self.player.as_mut() {
                    player.pause();
                }
            }
            PlaybackState::Paused(_) => {
                if let Some(player) = self.player.as_mut() {
                    player.play();
                }
            }
            PlaybackState::Stopped => self.dequeue_current(),
            _ => {}
        }
    }

    fn set_progress(&mut self, fraction: f32) {
        let Some(song) = self.song.clone() else {
            return;
        };
        let Some(player) = self.player.as_mut() else {
            return;
        };
        let duration = player.duration();
        let target = duration * fraction as f64;
        player.seek(target);
        if matches!(song.state(), PlaybackState::Paused(_)) {
            // Listeners must re-fire on the new timestamp even when the
            // write would otherwise be suppressed as equal.
            song.force_state(PlaybackState::Paused(PlaybackSnapshot::new(
                target, duration, true,
            )));
            self.notify_state_changed(&song);
        }
    }

    fn stop_playback(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.stop();
        }
        if let Some(song) = self.song.clone() {
            self.notify_stopped_playing(&song);
            if song.set_state(PlaybackState::Stopped) {
                self.notify_state_changed(&song);
            }
        }
        self.stop_timer();
    }

    fn complete(&mut self) {
        self.listeners.notify(|listener| listener.queue_completed());
        let _ = self
            .bus_producer
            .send(Message::Queue(QueueMessage::QueueCompleted));
    }

    fn player_times(&self) -> (f64, f64) {
        self.player
            .as_ref()
            .map(|player| (player.current_time(), player.duration()))
            .unwrap_or((0.0, 0.0))
    }

    // ------------------------------------------------------------------
    // Progress timer
    // ------------------------------------------------------------------

    fn start_timer(&mut self) {
        if self.timer_stop.is_some() {
            return;
        }
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let stop = Arc::new(AtomicBool::new(false));
        self.timer_stop = Some(Arc::clone(&stop));
        let bus = self.bus_producer.clone();
        let interval = Duration::from_millis(self.config.progress_tick_ms);
        thread::Builder::new()
            .name("progress-timer".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let delivered =
                        bus.send(Message::Queue(QueueMessage::ProgressTick { generation }));
                    if delivered.is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn progress timer");
    }

    /// No-op when the timer is already stopped.
    fn stop_timer(&mut self) {
        if let Some(stop) = self.timer_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
    }

    fn handle_progress_tick(&mut self, generation: u64) {
        if generation != self.timer_generation || self.timer_stop.is_none() {
            return;
        }
        let Some(song) = self.song.clone() else {
            return;
        };
        if !matches!(song.state(), PlaybackState::Playing(_)) {
            return;
        }
        let (position, duration) = self.player_times();
        if song.set_state(PlaybackState::Playing(PlaybackSnapshot::new(
            position, duration, true,
        ))) {
            self.notify_state_changed(&song);
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn notify_item_changed(&self, item: &Arc<QueueItem>) {
        self.listeners.notify(|listener| listener.item_changed(item));
        let _ = self
            .bus_producer
            .send(Message::Queue(QueueMessage::ItemChanged(item.stable_id())));
    }

    fn notify_state_changed(&self, item: &Arc<QueueItem>) {
        self.listeners
            .notify(|listener| listener.state_changed(item));
        let _ = self.bus_producer.send(Message::Queue(
            QueueMessage::StateChanged(item.stable_id(), item.state()),
        ));
    }

    fn notify_started_playing(&self, item: &Arc<QueueItem>) {
        self.listeners
            .notify(|listener| listener.started_playing(item));
        let _ = self.bus_producer.send(Message::Queue(
            QueueMessage::StartedPlaying(item.stable_id()),
        ));
    }

    fn notify_stopped_playing(&self, item: &Arc<QueueItem>) {
        self.listeners
            .notify(|listener| listener.stopped_playing(item));
        let _ = self.bus_producer.send(Message::Queue(
            QueueMessage::StoppedPlaying(item.stable_id()),
        ));
    }

    fn notify_timebase_changed(&self, item: &Arc<QueueItem>) {
        self.listeners
            .notify(|listener| listener.timebase_changed(item));
        let _ = self.bus_producer.send(Message::Queue(
            QueueMessage::TimebaseChanged(item.stable_id()),
        ));
    }

    fn publish_queue_changed(&self) {
        {
            let mut snapshot = self.snapshot.lock().expect("queue snapshot poisoned");
            snapshot.items = self.items.clone();
            snapshot.current_index = self.current;
            snapshot.repeat = self.repeat;
            snapshot.ready = self.ready;
        }
        let _ = self
            .bus_producer
            .send(Message::Queue(QueueMessage::QueueChanged {
                item_count: self.items.len(),
                current_index: self.current,
            }));
    }

    fn teardown(&mut self) {
        debug!("QueueController: tearing down session {}", self.session);
        self.stop_playback();
        if let Some(mut subscription) = self.fetch_subscription.take() {
            subscription.dispose();
        }
        self.listeners.clear();
        session::release(self.session);
    }
}
