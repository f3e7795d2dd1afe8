//! Listener contracts and ordered, thread-safe registries

use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::SingleParticipantSession;
use crate::error::SessionError;
use crate::participant::Participant;
use crate::protocol::{ControlChunk, DataPacket};

/// Receives every accepted data packet.
///
/// Callbacks run synchronously on the receive loop that accepted the packet;
/// hand off to another thread for anything slow.
pub trait DataListener: Send + Sync {
    fn on_data(&self, session: &SingleParticipantSession, participant: &Participant, packet: &DataPacket);
}

impl<F> DataListener for F
where
    F: Fn(&SingleParticipantSession, &Participant, &DataPacket) + Send + Sync,
{
    fn on_data(&self, session: &SingleParticipantSession, participant: &Participant, packet: &DataPacket) {
        self(session, participant, packet)
    }
}

/// Receives participant and lifecycle events. Every method defaults to a no-op.
pub trait EventListener: Send + Sync {
    /// The remote identity was pinned by a data packet
    fn on_joined_from_data(&self, _session: &SingleParticipantSession, _participant: &Participant, _packet: &DataPacket) {}

    /// The remote identity was pinned by a session description
    fn on_joined_from_control(&self, _session: &SingleParticipantSession, _participant: &Participant, _chunk: &ControlChunk) {}

    /// The remote's address or description changed
    fn on_participant_updated(&self, _session: &SingleParticipantSession, _participant: &Participant) {}

    /// The remote said goodbye
    fn on_participant_left(&self, _session: &SingleParticipantSession, _participant: &Participant) {}

    /// The local identifier was replaced after a collision
    fn on_collision_resolved(&self, _session: &SingleParticipantSession, _old_id: u32, _new_id: u32) {}

    /// Last callback of a session. `cause` is `None` for a normal shutdown.
    fn on_terminated(&self, _session: &SingleParticipantSession, _cause: Option<&SessionError>) {}
}

/// Handle returned on registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Insertion-ordered listener set.
///
/// Dispatch iterates a snapshot, so listeners may be added or removed
/// concurrently (even from inside a callback). A listener added during a
/// dispatch only sees later events.
pub struct ListenerRegistry<L: ?Sized> {
    entries: RwLock<Vec<(ListenerId, Arc<L>)>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    /// Returns false if `id` was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries.read().iter().map(|(_, listener)| listener.clone()).collect()
    }

    /// Invoke `call` on every listener in insertion order.
    ///
    /// `admit` is checked before each invocation; once it returns false the
    /// remaining listeners are skipped. A panicking listener is logged and
    /// does not affect the others.
    pub(crate) fn dispatch<A, F>(&self, event: &'static str, mut admit: A, mut call: F)
    where
        A: FnMut() -> bool,
        F: FnMut(&L),
    {
        for listener in self.snapshot() {
            if !admit() {
                break;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| call(&*listener))) {
                tracing::warn!(event, "Listener failed: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    trait Tap: Send + Sync {
        fn hit(&self, value: u32);
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, u32)>>>,
    }

    impl Tap for Recorder {
        fn hit(&self, value: u32) {
            self.log.lock().push((self.name, value));
        }
    }

    struct Exploder;

    impl Tap for Exploder {
        fn hit(&self, _value: u32) {
            panic!("listener exploded");
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<(&'static str, u32)>>>) -> Arc<dyn Tap> {
        Arc::new(Recorder { name, log: log.clone() })
    }

    #[test]
    fn test_dispatch_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry: ListenerRegistry<dyn Tap> = ListenerRegistry::new();
        registry.add(recorder("first", &log));
        let second = registry.add(recorder("second", &log));
        registry.add(recorder("third", &log));

        registry.dispatch("tap", || true, |tap| tap.hit(1));
        assert!(registry.remove(second));
        assert!(!registry.remove(second));
        registry.dispatch("tap", || true, |tap| tap.hit(2));

        assert_eq!(
            *log.lock(),
            vec![("first", 1), ("second", 1), ("third", 1), ("first", 2), ("third", 2)]
        );
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry: ListenerRegistry<dyn Tap> = ListenerRegistry::new();
        registry.add(recorder("before", &log));
        registry.add(Arc::new(Exploder));
        registry.add(recorder("after", &log));

        registry.dispatch("tap", || true, |tap| tap.hit(7));

        assert_eq!(*log.lock(), vec![("before", 7), ("after", 7)]);
    }

    #[test]
    fn test_admit_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry: ListenerRegistry<dyn Tap> = ListenerRegistry::new();
        registry.add(recorder("a", &log));
        registry.add(recorder("b", &log));
        registry.add(recorder("c", &log));

        let mut admitted = 0;
        registry.dispatch(
            "tap",
            || {
                admitted += 1;
                admitted <= 2
            },
            |tap| tap.hit(3),
        );

        assert_eq!(*log.lock(), vec![("a", 3), ("b", 3)]);
    }

    #[test]
    fn test_registration_during_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry: Arc<ListenerRegistry<dyn Tap>> = Arc::new(ListenerRegistry::new());
        let existing = registry.add(recorder("existing", &log));

        let late = recorder("late", &log);
        registry.dispatch("tap", || true, |tap| {
            tap.hit(1);
            registry.add(late.clone());
        });
        assert!(registry.remove(existing));
        registry.dispatch("tap", || true, |tap| tap.hit(2));

        assert_eq!(*log.lock(), vec![("existing", 1), ("late", 2)]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
