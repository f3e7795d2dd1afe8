//! Hand-off of session callbacks to another thread
//!
//! Listener callbacks run on the receive loops. [`EventForwarder`] turns them
//! into owned [`SessionEvent`] values pushed into a bounded channel, so a
//! consumer can process them at its own pace. A full channel drops the event
//! rather than stalling the receive loop, except for the termination event:
//! it evicts the oldest queued event so the consumer always sees it last.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{DataListener, EventListener, SingleParticipantSession};
use crate::constants::DEFAULT_EVENT_CAPACITY;
use crate::error::SessionError;
use crate::participant::Participant;
use crate::protocol::{ControlChunk, DataPacket};

/// Owned copy of a session callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Data {
        session: String,
        participant: Participant,
        packet: DataPacket,
    },
    JoinedFromData {
        session: String,
        participant: Participant,
        packet: DataPacket,
    },
    JoinedFromControl {
        session: String,
        participant: Participant,
        chunk: ControlChunk,
    },
    ParticipantUpdated {
        session: String,
        participant: Participant,
    },
    ParticipantLeft {
        session: String,
        participant: Participant,
    },
    CollisionResolved {
        session: String,
        old_id: u32,
        new_id: u32,
    },
    Terminated {
        session: String,
        cause: Option<SessionError>,
    },
}

impl SessionEvent {
    /// Name of the session that produced the event
    pub fn session(&self) -> &str {
        match self {
            Self::Data { session, .. }
            | Self::JoinedFromData { session, .. }
            | Self::JoinedFromControl { session, .. }
            | Self::ParticipantUpdated { session, .. }
            | Self::ParticipantLeft { session, .. }
            | Self::CollisionResolved { session, .. }
            | Self::Terminated { session, .. } => session,
        }
    }
}

/// Listener that forwards everything it sees into a crossbeam channel.
///
/// Register the same instance as data and event listener to get a single
/// ordered stream per receive loop.
pub struct EventForwarder {
    tx: Sender<SessionEvent>,
    /// Used only to make room for the termination event
    overflow: Receiver<SessionEvent>,
    dropped: AtomicU64,
}

impl EventForwarder {
    /// Forwarder with the default capacity
    pub fn new() -> (Arc<Self>, Receiver<SessionEvent>) {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Arc<Self>, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let forwarder = Arc::new(Self {
            tx,
            overflow: rx.clone(),
            dropped: AtomicU64::new(0),
        });
        (forwarder, rx)
    }

    /// Events lost because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Deliver `event` even if the channel is full
    fn forward_last(&self, mut event: SessionEvent) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    event = rejected;
                    if self.overflow.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

impl DataListener for EventForwarder {
    fn on_data(&self, session: &SingleParticipantSession, participant: &Participant, packet: &DataPacket) {
        self.forward(SessionEvent::Data {
            session: session.name().to_string(),
            participant: participant.clone(),
            packet: packet.clone(),
        });
    }
}

impl EventListener for EventForwarder {
    fn on_joined_from_data(&self, session: &SingleParticipantSession, participant: &Participant, packet: &DataPacket) {
        self.forward(SessionEvent::JoinedFromData {
            session: session.name().to_string(),
            participant: participant.clone(),
            packet: packet.clone(),
        });
    }

    fn on_joined_from_control(&self, session: &SingleParticipantSession, participant: &Participant, chunk: &ControlChunk) {
        self.forward(SessionEvent::JoinedFromControl {
            session: session.name().to_string(),
            participant: participant.clone(),
            chunk: chunk.clone(),
        });
    }

    fn on_participant_updated(&self, session: &SingleParticipantSession, participant: &Participant) {
        self.forward(SessionEvent::ParticipantUpdated {
            session: session.name().to_string(),
            participant: participant.clone(),
        });
    }

    fn on_participant_left(&self, session: &SingleParticipantSession, participant: &Participant) {
        self.forward(SessionEvent::ParticipantLeft {
            session: session.name().to_string(),
            participant: participant.clone(),
        });
    }

    fn on_collision_resolved(&self, session: &SingleParticipantSession, old_id: u32, new_id: u32) {
        self.forward(SessionEvent::CollisionResolved {
            session: session.name().to_string(),
            old_id,
            new_id,
        });
    }

    fn on_terminated(&self, session: &SingleParticipantSession, cause: Option<&SessionError>) {
        self.forward_last(SessionEvent::Terminated {
            session: session.name().to_string(),
            cause: cause.cloned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn idle_session() -> SingleParticipantSession {
        let address = SocketAddr::from(([127, 0, 0, 1], 0));
        SingleParticipantSession::new(
            "forwarded",
            8,
            Participant::new(address, address, 1),
            Participant::new(address, address, 2),
        )
    }

    #[test]
    fn test_full_channel_drops_events() {
        let session = idle_session();
        let participant = session.remote_participant();
        let (forwarder, events) = EventForwarder::with_capacity(2);

        for _ in 0..3 {
            forwarder.on_participant_updated(&session, &participant);
        }

        assert_eq!(events.len(), 2);
        assert_eq!(forwarder.dropped(), 1);
        assert_eq!(events.try_recv().unwrap().session(), "forwarded");
    }

    #[test]
    fn test_terminated_survives_full_channel() {
        let session = idle_session();
        let participant = session.remote_participant();
        let (forwarder, events) = EventForwarder::with_capacity(2);
        session.add_event_listener(forwarder.clone());

        forwarder.on_participant_updated(&session, &participant);
        forwarder.on_participant_left(&session, &participant);
        session.terminate();

        let seen: Vec<SessionEvent> = events.try_iter().collect();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], SessionEvent::ParticipantLeft { .. }));
        assert!(matches!(seen[1], SessionEvent::Terminated { cause: None, .. }));
        assert_eq!(forwarder.dropped(), 1);
    }
}
