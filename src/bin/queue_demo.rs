//! Drives a voice-message queue end-to-end with simulated collaborators.
//!
//! Three voice messages are loaded into an in-memory history; playback
//! starts at the newest and auto-advances toward older messages until the
//! queue completes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;
use tokio::sync::broadcast;

use voxdeck::config::Config;
use voxdeck::diff::PreparationQueue;
use voxdeck::fetch::{ContentStore, MemoryContentStore};
use voxdeck::player::{PlayerBackend, SimulatedPlayerBackend};
use voxdeck::protocol::{
    MediaAttachment, MediaKind, Message, MessageId, MessageOrd, MessageRecord, PeerId,
    QueueMessage, ResourceRef,
};
use voxdeck::queue::controller::{QueueController, QueueDeps};
use voxdeck::queue::history::{HistorySource, MemoryHistorySource};

const PEER: PeerId = PeerId(1);

fn voice_message(id: i32, timestamp: i64) -> MessageRecord {
    MessageRecord {
        id: MessageId { peer: PEER, id },
        timestamp,
        author: Some("Alice".to_string()),
        forwarded_from: None,
        outgoing: false,
        revision: 0,
        text: String::new(),
        media: Some(MediaAttachment {
            resource: ResourceRef(format!("demo-voice-{id}")),
            mime_type: "audio/ogg".to_string(),
            file_name: None,
            title: None,
            performer: None,
            kind: MediaKind::Voice,
            duration_secs: 2,
        }),
    }
}

fn main() {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = Config::default();
    let store = Arc::new(MemoryContentStore::new());
    let backend = Arc::new(SimulatedPlayerBackend::with_default_duration(2.0));
    let history = Arc::new(MemoryHistorySource::new());

    for id in 1..=3 {
        let record = voice_message(id, id as i64 * 100);
        let media = record.media.clone().expect("voice media");
        store.add_local(media.resource, format!("/tmp/demo-voice-{id}.oga"));
        history.push_message(record);
    }

    let (bus, mut receiver) = broadcast::channel(1024);
    let handle = QueueController::chat_voice(
        QueueDeps {
            store: Arc::clone(&store) as Arc<dyn ContentStore>,
            backend: Arc::clone(&backend) as Arc<dyn PlayerBackend>,
            consumption: None,
            prepare: PreparationQueue::new(),
            config: config.playback.clone(),
        },
        Arc::clone(&history) as Arc<dyn HistorySource>,
        bus,
        PEER,
        // Start at the newest message; traversal runs toward older ones.
        Some(MessageOrd {
            timestamp: 300,
            id: MessageId { peer: PEER, id: 3 },
        }),
    );

    loop {
        match receiver.blocking_recv() {
            Ok(Message::Queue(QueueMessage::StartedPlaying(id))) => {
                info!("demo: playing {id:?}");
                let player = backend.last_opened().expect("no player opened");
                thread::sleep(Duration::from_millis(300));
                player.finish();
            }
            Ok(Message::Queue(QueueMessage::QueueCompleted)) => {
                info!("demo: queue completed");
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    handle.shutdown();
}
