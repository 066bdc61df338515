//! External player interface and an in-process simulated implementation.
//!
//! The queue controller treats the player as opaque: it opens one per local
//! media path, drives it with play/pause/stop/seek, and consumes its
//! callbacks as generation-tagged bus messages so events from a superseded
//! player are discarded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::Sender;

use crate::error::PlayerError;
use crate::protocol::{Message, QueueMessage};

/// Callback emitted by an external player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Playback actually started after `play`.
    Started,
    /// The track played to its end.
    Finished,
    /// Playback paused after `pause`.
    Paused,
    /// The player's timebase changed; listeners are notified, no state change.
    TimebaseChanged,
}

/// Delivers player callbacks onto the controller bus.
///
/// The generation identifies the player instance the sink was created for;
/// the controller drops events carrying a stale generation.
#[derive(Clone)]
pub struct PlayerEventSink {
    bus: Sender<Message>,
    generation: u64,
}

impl PlayerEventSink {
    pub fn new(bus: Sender<Message>, generation: u64) -> Self {
        Self { bus, generation }
    }

    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.bus.send(Message::Queue(QueueMessage::Player {
            generation: self.generation,
            event,
        }));
    }
}

/// Opaque media player driven by the queue controller.
pub trait ExternalPlayer: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Seeks to an absolute position in seconds.
    fn seek(&mut self, position: f64);
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;
    /// Track duration in seconds; may be zero for degenerate media.
    fn duration(&self) -> f64;
    /// Current timebase rate; exposed for listener-side timing.
    fn timebase(&self) -> f64;
}

/// Opens an [`ExternalPlayer`] for a fully local media path.
pub trait PlayerBackend: Send + Sync {
    fn open(
        &self,
        path: &Path,
        events: PlayerEventSink,
    ) -> Result<Box<dyn ExternalPlayer>, PlayerError>;
}

#[derive(Debug)]
struct SimulatedPlayerState {
    position: f64,
    duration: f64,
    playing: bool,
    timebase: f64,
}

/// In-process player with a manually driven clock.
///
/// Emits `Started`/`Paused` synchronously from `play`/`pause`; end-of-track
/// and timebase events are emitted through the paired
/// [`SimulatedPlayerHandle`].
pub struct SimulatedPlayer {
    state: Arc<Mutex<SimulatedPlayerState>>,
    events: PlayerEventSink,
}

impl ExternalPlayer for SimulatedPlayer {
    fn play(&mut self) {
        self.state.lock().expect("player state poisoned").playing = true;
        self.events.emit(PlayerEvent::Started);
    }

    fn pause(&mut self) {
        self.state.lock().expect("player state poisoned").playing = false;
        self.events.emit(PlayerEvent::Paused);
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().expect("player state poisoned");
        state.playing = false;
    }

    fn seek(&mut self, position: f64) {
        let mut state = self.state.lock().expect("player state poisoned");
        state.position = position.clamp(0.0, state.duration.max(0.0));
    }

    fn current_time(&self) -> f64 {
        self.state.lock().expect("player state poisoned").position
    }

    fn duration(&self) -> f64 {
        self.state.lock().expect("player state poisoned").duration
    }

    fn timebase(&self) -> f64 {
        self.state.lock().expect("player state poisoned").timebase
    }
}

/// Test/demo-side handle to one opened [`SimulatedPlayer`].
#[derive(Clone)]
pub struct SimulatedPlayerHandle {
    path: PathBuf,
    state: Arc<Mutex<SimulatedPlayerState>>,
    events: PlayerEventSink,
}

impl SimulatedPlayerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().expect("player state poisoned").playing
    }

    pub fn position(&self) -> f64 {
        self.state.lock().expect("player state poisoned").position
    }

    /// Moves the clock forward while playing.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.lock().expect("player state poisoned");
        if state.playing {
            state.position = (state.position + seconds).min(state.duration);
        }
    }

    /// Runs the track to its end and emits `Finished`.
    pub fn finish(&self) {
        {
            let mut state = self.state.lock().expect("player state poisoned");
            state.position = state.duration;
            state.playing = false;
        }
        self.events.emit(PlayerEvent::Finished);
    }

    pub fn change_timebase(&self, rate: f64) {
        self.state.lock().expect("player state poisoned").timebase = rate;
        self.events.emit(PlayerEvent::TimebaseChanged);
    }
}

/// Backend producing [`SimulatedPlayer`] instances, used by tests and demos.
pub struct SimulatedPlayerBackend {
    durations: Mutex<HashMap<PathBuf, f64>>,
    default_duration: f64,
    opened: Mutex<Vec<SimulatedPlayerHandle>>,
}

impl SimulatedPlayerBackend {
    pub fn new() -> Self {
        Self::with_default_duration(30.0)
    }

    pub fn with_default_duration(default_duration: f64) -> Self {
        Self {
            durations: Mutex::new(HashMap::new()),
            default_duration,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the reported duration for one media path.
    pub fn set_duration(&self, path: impl Into<PathBuf>, seconds: f64) {
        self.durations
            .lock()
            .expect("backend state poisoned")
            .insert(path.into(), seconds);
    }

    /// Handle to the most recently opened player.
    pub fn last_opened(&self) -> Option<SimulatedPlayerHandle> {
        self.opened
            .lock()
            .expect("backend state poisoned")
            .last()
            .cloned()
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().expect("backend state poisoned").len()
    }
}

impl Default for SimulatedPlayerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerBackend for SimulatedPlayerBackend {
    fn open(
        &self,
        path: &Path,
        events: PlayerEventSink,
    ) -> Result<Box<dyn ExternalPlayer>, PlayerError> {
        let duration = self
            .durations
            .lock()
            .expect("backend state poisoned")
            .get(path)
            .copied()
            .unwrap_or(self.default_duration);
        let state = Arc::new(Mutex::new(SimulatedPlayerState {
            position: 0.0,
            duration,
            playing: false,
            timebase: 1.0,
        }));
        let handle = SimulatedPlayerHandle {
            path: path.to_path_buf(),
            state: Arc::clone(&state),
            events: events.clone(),
        };
        self.opened
            .lock()
            .expect("backend state poisoned")
            .push(handle);
        Ok(Box::new(SimulatedPlayer { state, events }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[test]
    fn test_play_emits_started_with_generation() {
        let (bus, mut receiver) = broadcast::channel(16);
        let backend = SimulatedPlayerBackend::new();
        let mut player = backend
            .open(Path::new("/tmp/a.mp3"), PlayerEventSink::new(bus, 7))
            .expect("open failed");

        player.play();

        match receiver.try_recv() {
            Ok(Message::Queue(QueueMessage::Player { generation, event })) => {
                assert_eq!(generation, 7);
                assert_eq!(event, PlayerEvent::Started);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let (bus, _receiver) = broadcast::channel(16);
        let backend = SimulatedPlayerBackend::new();
        backend.set_duration("/tmp/a.mp3", 12.0);
        let mut player = backend
            .open(Path::new("/tmp/a.mp3"), PlayerEventSink::new(bus, 0))
            .expect("open failed");

        player.seek(99.0);
        assert_eq!(player.current_time(), 12.0);
        player.seek(-5.0);
        assert_eq!(player.current_time(), 0.0);
    }

    #[test]
    fn test_handle_advances_only_while_playing() {
        let (bus, _receiver) = broadcast::channel(16);
        let backend = SimulatedPlayerBackend::new();
        backend.set_duration("/tmp/a.mp3", 10.0);
        let mut player = backend
            .open(Path::new("/tmp/a.mp3"), PlayerEventSink::new(bus, 0))
            .expect("open failed");
        let handle = backend.last_opened().expect("no opened player");

        handle.advance(3.0);
        assert_eq!(handle.position(), 0.0);

        player.play();
        handle.advance(3.0);
        assert_eq!(handle.position(), 3.0);

        handle.advance(100.0);
        assert_eq!(handle.position(), 10.0);
    }
}
