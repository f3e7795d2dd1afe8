//! # rtp-duo
//!
//! Point-to-point real-time transport session layer.
//!
//! A [`SingleParticipantSession`] exchanges RTP data packets and RTCP
//! session-description packets with exactly one remote participant over UDP:
//!
//! - pins the remote identity from the first data or control packet
//! - discards traffic from any other identity afterwards
//! - re-binds the remote address when the peer shows up from a new source
//!   (symmetric NAT, peer restart)
//! - resolves identifier collisions by re-assigning the local identifier
//! - notifies registered listeners synchronously from the receive loops
//!
//! ```text
//!   caller ──send──> Session Core ──encode──> data channel (UDP) ──> peer
//!                         ▲
//!   listeners <──dispatch─┤
//!                         │
//!   peer ──> data/control channels ──decode──> receive loops
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod network;
pub mod participant;
pub mod protocol;
pub mod session;

pub use config::{NetworkConfig, ParticipantConfig, SessionConfig};
pub use error::{CodecError, Error, NetworkError, SessionError};
pub use participant::Participant;
pub use protocol::{ControlChunk, ControlPacket, DataPacket, Goodbye, SdesItem};
pub use session::{
    DataListener, EventForwarder, EventListener, ListenerId, SessionEvent, SessionState,
    SessionStats, SingleParticipantSession,
};

/// Result alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
