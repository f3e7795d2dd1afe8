//! Session core
//!
//! - `single`: the point-to-point session, its receive loops and shutdown
//! - `listener`: listener traits and the registry that dispatches to them
//! - `forward`: listener that hands events to another thread over a channel

mod forward;
mod listener;
mod single;


pub use forward::{EventForwarder, SessionEvent};
pub use listener::{DataListener, EventListener, ListenerId, ListenerRegistry};
pub use single::SingleParticipantSession;

use crate::network::ChannelStats;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, nothing bound
    Created,
    /// Channels bound, receive loops starting
    Initialized,
    /// Sending and receiving
    Running,
    /// Shut down for good
    Terminated,
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub data_packets_sent: u64,
    /// Data packets handed to listeners
    pub data_packets_delivered: u64,
    /// Control chunks and goodbyes accepted from the remote
    pub control_packets_delivered: u64,
    pub collisions_resolved: u64,
    /// Transport counters, `None` unless the session is running
    pub data_channel: Option<ChannelStats>,
    pub control_channel: Option<ChannelStats>,
}
