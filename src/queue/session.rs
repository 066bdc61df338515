//! Process-wide active playback session registry.
//!
//! At most one queue controller plays at a time. Activating a new session
//! hands the previous holder a deactivation message through its own bus —
//! outside the registry lock, so teardown can never re-enter the registry —
//! and then installs itself.

use std::sync::Mutex;

use log::debug;
use once_cell::sync::Lazy;
use tokio::sync::broadcast::Sender;
use uuid::Uuid;

use crate::protocol::{Message, QueueMessage};

struct ActiveSession {
    id: Uuid,
    bus: Sender<Message>,
}

static ACTIVE_SESSION: Lazy<Mutex<Option<ActiveSession>>> = Lazy::new(|| Mutex::new(None));

/// Serializes tests that exercise the process-wide registry.
#[cfg(test)]
pub(crate) static SESSION_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Installs a session as the active one, deactivating any predecessor.
pub fn activate(id: Uuid, bus: Sender<Message>) {
    let previous = {
        let mut active = ACTIVE_SESSION.lock().expect("session registry poisoned");
        active.replace(ActiveSession { id, bus })
    };
    if let Some(previous) = previous {
        if previous.id != id {
            debug!("Session {id} takes over playback from {}", previous.id);
            let _ = previous.bus.send(Message::Queue(QueueMessage::Deactivate {
                session: previous.id,
            }));
        }
    }
}

/// Releases the active slot if it is still held by this session.
///
/// A session superseded earlier must not clear its successor, so release
/// is a no-op for any id other than the current holder.
pub fn release(id: Uuid) {
    let mut active = ACTIVE_SESSION.lock().expect("session registry poisoned");
    if active.as_ref().map(|session| session.id) == Some(id) {
        *active = None;
    }
}

/// Whether the given session currently holds the active slot.
pub fn is_active(id: Uuid) -> bool {
    ACTIVE_SESSION
        .lock()
        .expect("session registry poisoned")
        .as_ref()
        .map(|session| session.id)
        == Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[test]
    fn test_activation_deactivates_previous_session() {
        let _guard = SESSION_TEST_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (first_bus, mut first_receiver) = broadcast::channel(16);
        let (second_bus, _second_receiver) = broadcast::channel(16);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        activate(first, first_bus);
        assert!(is_active(first));

        activate(second, second_bus);
        assert!(is_active(second));
        assert!(!is_active(first));

        match first_receiver.try_recv() {
            Ok(Message::Queue(QueueMessage::Deactivate { session })) => {
                assert_eq!(session, first);
            }
            other => panic!("expected deactivation, got {:?}", other),
        }

        release(second);
        assert!(!is_active(second));
    }

    #[test]
    fn test_release_by_superseded_session_keeps_successor() {
        let _guard = SESSION_TEST_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (first_bus, _first_receiver) = broadcast::channel(16);
        let (second_bus, _second_receiver) = broadcast::channel(16);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        activate(first, first_bus);
        activate(second, second_bus);

        release(first);
        assert!(is_active(second));

        release(second);
    }
}
