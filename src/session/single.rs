//! Session with exactly one remote participant
//!
//! ## Receive path
//!
//! ```text
//! datagram ──decode──> sender filter ──> collision check ──> pin identity ──> re-bind address ──> listeners
//!              │             │
//!              └─ malformed  └─ not the pinned remote: dropped silently
//! ```
//!
//! All identity/address state sits behind one mutex. Listener callbacks run
//! after that mutex is released, on the receive loop that accepted the packet,
//! while the loop read-holds the session's dispatch gate. Termination
//! write-acquires the gate before notifying, which makes `on_terminated` the
//! last callback every listener sees.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::cell::Cell;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use super::listener::{panic_message, DataListener, EventListener, ListenerId, ListenerRegistry};
use super::{SessionState, SessionStats};
use crate::config::{NetworkConfig, SessionConfig};
use crate::error::SessionError;
use crate::network::udp::{is_transient, UdpChannel};
use crate::participant::{generate_id, Participant};
use crate::protocol::{
    decode_control, decode_data, encode_control, encode_data, ControlChunk, ControlPacket, DataPacket, Goodbye,
    SdesItem, MAX_PAYLOAD_TYPE,
};

static NEXT_SESSION_SERIAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Serial of the session whose dispatch gate this thread read-holds, 0 if none
    static DISPATCHING: Cell<u64> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    Data,
    Control,
}

impl ChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Control => "control",
        }
    }
}

struct Channels {
    data: Arc<UdpChannel>,
    control: Arc<UdpChannel>,
}

impl Channels {
    fn get(&self, kind: ChannelKind) -> &Arc<UdpChannel> {
        match kind {
            ChannelKind::Data => &self.data,
            ChannelKind::Control => &self.control,
        }
    }
}

struct Participants {
    local: Participant,
    remote: Participant,
    /// Set once the remote identity has been learned from traffic
    remote_established: bool,
}

impl Participants {
    fn local_id(&self) -> u32 {
        self.local.id().unwrap_or_default()
    }

    /// Traffic from anyone but the pinned remote is ignored
    fn accepts(&self, sender_id: u32) -> bool {
        !self.remote_established || self.remote.id() == Some(sender_id)
    }

    /// Replace the local identifier if `sender_id` uses it.
    /// Returns `(old_id, new_id)` when a collision was resolved.
    fn resolve_collision(&mut self, sender_id: u32) -> Option<(u32, u32)> {
        let old_id = self.local_id();
        if sender_id != old_id {
            return None;
        }
        let mut excluded = vec![old_id];
        excluded.extend(self.remote.id());
        let new_id = generate_id(&excluded);
        self.local.set_id(new_id);
        Some((old_id, new_id))
    }

    fn establish_remote(&mut self, sender_id: u32) {
        self.remote.set_id(sender_id);
        self.remote_established = true;
    }
}

/// Read-holds the dispatch gate and marks the current thread as dispatching
/// for this session
struct DispatchScope<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    previous: u64,
}

impl<'a> DispatchScope<'a> {
    fn enter(session: &'a SingleParticipantSession) -> Self {
        let gate = session.gate.read();
        let previous = DISPATCHING.with(|current| current.replace(session.serial));
        Self { _gate: gate, previous }
    }
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        DISPATCHING.with(|current| current.set(self.previous));
    }
}

/// Point-to-point session between the local participant and one remote.
///
/// Created with [`new`](Self::new) or [`from_config`](Self::from_config),
/// wrapped in an `Arc`, then started with [`init`](Self::init). Once
/// terminated a session never runs again; every operation then returns
/// `false` or an error without touching listeners.
pub struct SingleParticipantSession {
    serial: u64,
    name: String,
    payload_type: u8,
    network: NetworkConfig,
    automated_control: bool,
    stamp_sender_id: bool,

    lifecycle: Mutex<SessionState>,
    running: AtomicBool,
    participants: Mutex<Participants>,
    sequence: AtomicU16,

    channels: RwLock<Option<Channels>>,
    receive_loops: Mutex<Vec<JoinHandle<()>>>,
    gate: RwLock<()>,
    pending_termination: Mutex<Option<Option<SessionError>>>,

    data_listeners: ListenerRegistry<dyn DataListener>,
    event_listeners: ListenerRegistry<dyn EventListener>,

    data_packets_sent: AtomicU64,
    data_packets_delivered: AtomicU64,
    control_packets_delivered: AtomicU64,
    collisions_resolved: AtomicU64,
}

impl SingleParticipantSession {
    /// Create a session with default network settings.
    ///
    /// A local participant without identifier gets a random one. The remote's
    /// identifier, if given, is only a hint until traffic pins it.
    ///
    /// Payload types above 127 do not fit the header and are masked to 7 bits.
    pub fn new(name: impl Into<String>, payload_type: u8, local: Participant, remote: Participant) -> Self {
        let name = name.into();
        let cname = name.clone();
        if payload_type > MAX_PAYLOAD_TYPE {
            tracing::warn!(session = %name, "Payload type {} out of range, using {}", payload_type, payload_type & MAX_PAYLOAD_TYPE);
        }
        let payload_type = payload_type & MAX_PAYLOAD_TYPE;
        Self::build(name, payload_type, local, remote, NetworkConfig::default(), cname)
    }

    /// Create a session from configuration, resolving both participants.
    ///
    /// Rejects payload types that do not fit the 7-bit header field.
    pub fn from_config(config: &SessionConfig) -> crate::Result<Self> {
        if config.payload_type > MAX_PAYLOAD_TYPE {
            return Err(crate::Error::Config(format!(
                "payload type {} exceeds {}",
                config.payload_type, MAX_PAYLOAD_TYPE
            )));
        }
        let local = config.local.resolve()?;
        let remote = config.remote.resolve()?;
        let cname = config.cname.clone().unwrap_or_else(|| config.name.clone());

        let mut session = Self::build(
            config.name.clone(),
            config.payload_type,
            local,
            remote,
            config.network.clone(),
            cname,
        );
        session.automated_control = config.automated_control;
        session.stamp_sender_id = config.stamp_sender_id;
        Ok(session)
    }

    fn build(
        name: String,
        payload_type: u8,
        mut local: Participant,
        remote: Participant,
        network: NetworkConfig,
        cname: String,
    ) -> Self {
        if local.id().is_none() {
            let excluded: Vec<u32> = remote.id().into_iter().collect();
            local.set_id(generate_id(&excluded));
        }
        local.set_description_item(SdesItem::Cname, cname);
        local.set_description_item(SdesItem::Tool, concat!("rtp-duo ", env!("CARGO_PKG_VERSION")));

        Self {
            serial: NEXT_SESSION_SERIAL.fetch_add(1, Ordering::Relaxed),
            name,
            payload_type,
            network,
            automated_control: false,
            stamp_sender_id: true,
            lifecycle: Mutex::new(SessionState::Created),
            running: AtomicBool::new(false),
            participants: Mutex::new(Participants {
                local,
                remote,
                remote_established: false,
            }),
            sequence: AtomicU16::new(rand::random()),
            channels: RwLock::new(None),
            receive_loops: Mutex::new(Vec::new()),
            gate: RwLock::new(()),
            pending_termination: Mutex::new(None),
            data_listeners: ListenerRegistry::new(),
            event_listeners: ListenerRegistry::new(),
            data_packets_sent: AtomicU64::new(0),
            data_packets_delivered: AtomicU64::new(0),
            control_packets_delivered: AtomicU64::new(0),
            collisions_resolved: AtomicU64::new(0),
        }
    }

    /// Socket options used by `init`
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Announce on init and send a goodbye on terminate
    pub fn with_automated_control(mut self, enabled: bool) -> Self {
        self.automated_control = enabled;
        self
    }

    /// When disabled, outgoing data packets keep the sender identifier the caller set
    pub fn with_sender_id_stamping(mut self, enabled: bool) -> Self {
        self.stamp_sender_id = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn state(&self) -> SessionState {
        *self.lifecycle.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the local participant
    pub fn local_participant(&self) -> Participant {
        self.participants.lock().local.clone()
    }

    /// Snapshot of the remote participant
    pub fn remote_participant(&self) -> Participant {
        self.participants.lock().remote.clone()
    }

    /// Whether the remote identity has been learned from traffic
    pub fn is_remote_established(&self) -> bool {
        self.participants.lock().remote_established
    }

    pub fn add_data_listener(&self, listener: Arc<dyn DataListener>) -> ListenerId {
        self.data_listeners.add(listener)
    }

    pub fn remove_data_listener(&self, id: ListenerId) -> bool {
        self.data_listeners.remove(id)
    }

    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.event_listeners.add(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.event_listeners.remove(id)
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        let channels = self.channels.read();
        SessionStats {
            data_packets_sent: self.data_packets_sent.load(Ordering::Relaxed),
            data_packets_delivered: self.data_packets_delivered.load(Ordering::Relaxed),
            control_packets_delivered: self.control_packets_delivered.load(Ordering::Relaxed),
            collisions_resolved: self.collisions_resolved.load(Ordering::Relaxed),
            data_channel: channels.as_ref().map(|c| c.data.stats()),
            control_channel: channels.as_ref().map(|c| c.control.stats()),
        }
    }

    /// Bind both channels and start the receive loops.
    ///
    /// Fails if the session already ran, or if either channel cannot be bound;
    /// a failed init leaves the session in `Created` so it can be retried.
    pub fn init(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            SessionState::Created => {}
            SessionState::Terminated => return Err(SessionError::Terminated),
            SessionState::Initialized | SessionState::Running => return Err(SessionError::AlreadyRunning),
        }

        let (data_address, control_address) = {
            let participants = self.participants.lock();
            (participants.local.data_address(), participants.local.control_address())
        };

        let data = Arc::new(UdpChannel::bind(data_address, &self.network).map_err(|e| {
            tracing::warn!(session = %self.name, "Failed to bind data channel: {}", e);
            e
        })?);
        let control = Arc::new(UdpChannel::bind(control_address, &self.network).map_err(|e| {
            tracing::warn!(session = %self.name, "Failed to bind control channel: {}", e);
            e
        })?);

        {
            let mut participants = self.participants.lock();
            participants.local.rebind_data(data.local_addr());
            participants.local.rebind_control(control.local_addr());
        }
        *self.channels.write() = Some(Channels {
            data: data.clone(),
            control: control.clone(),
        });
        *lifecycle = SessionState::Initialized;
        self.running.store(true, Ordering::SeqCst);

        let mut handles = Vec::with_capacity(2);
        for (kind, channel) in [(ChannelKind::Data, data), (ChannelKind::Control, control)] {
            match self.spawn_receive_loop(kind, channel) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // loops already started exit on their next wake-up
                    self.running.store(false, Ordering::SeqCst);
                    self.channels.write().take();
                    *lifecycle = SessionState::Created;
                    tracing::error!(session = %self.name, "Failed to start {} receive loop: {}", kind.as_str(), e);
                    return Err(SessionError::Spawn(e.to_string()));
                }
            }
        }
        *self.receive_loops.lock() = handles;
        *lifecycle = SessionState::Running;
        drop(lifecycle);

        tracing::info!(
            session = %self.name,
            local = %self.local_participant(),
            remote = %self.remote_participant(),
            "Session running"
        );

        if self.automated_control && !self.announce() {
            tracing::debug!(session = %self.name, "Initial announcement was not sent");
        }

        Ok(())
    }

    fn spawn_receive_loop(self: &Arc<Self>, kind: ChannelKind, channel: Arc<UdpChannel>) -> std::io::Result<JoinHandle<()>> {
        let session = Arc::downgrade(self);
        thread::Builder::new()
            .name(format!("{}-{}-rx", self.name, kind.as_str()))
            .spawn(move || receive_loop(session, channel, kind))
    }

    /// Terminate the session normally. Idempotent and callable from any
    /// thread, including from inside a listener callback.
    pub fn terminate(&self) {
        self.terminate_with(None);
    }

    /// Terminate the session, handing `cause` to every `on_terminated`.
    /// `None` is a normal shutdown. Only the first call has any effect.
    pub fn terminate_with(&self, cause: Option<SessionError>) {
        let previous = {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == SessionState::Terminated {
                return;
            }
            std::mem::replace(&mut *lifecycle, SessionState::Terminated)
        };

        if previous == SessionState::Running && self.automated_control {
            let _ = self.send_goodbye(Some("session terminated"));
        }
        self.running.store(false, Ordering::SeqCst);
        drop(self.channels.write().take());
        self.join_receive_loops();

        match &cause {
            Some(cause) => tracing::warn!(session = %self.name, "Session terminated: {}", cause),
            None => tracing::info!(session = %self.name, "Session terminated"),
        }

        // Called from a callback: the gate is read-held by this very thread,
        // the receive loop completes the notification once it is released.
        if DISPATCHING.with(|current| current.get()) == self.serial {
            *self.pending_termination.lock() = Some(cause);
            return;
        }
        self.finish_termination(cause);
    }

    fn join_receive_loops(&self) {
        let handles = std::mem::take(&mut *self.receive_loops.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(session = %self.name, "Receive loop panicked");
            }
        }
    }

    fn complete_deferred_termination(&self) {
        let pending = self.pending_termination.lock().take();
        if let Some(cause) = pending {
            self.finish_termination(cause);
        }
    }

    fn finish_termination(&self, cause: Option<SessionError>) {
        let _gate = self.gate.write();
        self.event_listeners
            .dispatch("terminated", || true, |listener| listener.on_terminated(self, cause.as_ref()));
    }

    /// Stamp and send a data packet to the remote's data address.
    ///
    /// Overwrites the payload type, the sequence number and (unless stamping
    /// is disabled) the sender identifier. Returns true if the transport
    /// accepted the datagram.
    pub fn send_data_packet(&self, packet: &mut DataPacket) -> bool {
        if !self.is_running() {
            return false;
        }

        let (local_id, destination) = {
            let participants = self.participants.lock();
            (participants.local_id(), participants.remote.data_address())
        };

        packet.payload_type = self.payload_type;
        if self.stamp_sender_id {
            packet.sender_id = local_id;
        }
        packet.sequence_number = self.sequence.fetch_add(1, Ordering::Relaxed);

        let sent = self.write_datagram(ChannelKind::Data, &encode_data(packet), destination);
        if sent {
            self.data_packets_sent.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(session = %self.name, %destination, "Sent {}", packet);
        }
        sent
    }

    /// Build a data packet from raw bytes and send it
    pub fn send_data(&self, payload: impl Into<Bytes>, timestamp: u32, marker: bool) -> bool {
        let mut packet = DataPacket::new(payload)
            .with_timestamp(timestamp)
            .with_marker(marker);
        self.send_data_packet(&mut packet)
    }

    /// Send a compound control datagram to the remote's control address
    pub fn send_control_packet(&self, packets: &[ControlPacket]) -> bool {
        if !self.is_running() || packets.is_empty() {
            return false;
        }
        let destination = self.participants.lock().remote.control_address();
        self.write_datagram(ChannelKind::Control, &encode_control(packets), destination)
    }

    /// Describe the local participant to the remote
    pub fn announce(&self) -> bool {
        let chunk = self.participants.lock().local.to_control_chunk();
        match chunk {
            Some(chunk) => self.send_control_packet(&[ControlPacket::Description(vec![chunk])]),
            None => false,
        }
    }

    /// Tell the remote the local participant is leaving
    pub fn send_goodbye(&self, reason: Option<&str>) -> bool {
        let (chunk, local_id) = {
            let participants = self.participants.lock();
            (participants.local.to_control_chunk(), participants.local_id())
        };
        let mut packets = Vec::with_capacity(2);
        if let Some(chunk) = chunk {
            packets.push(ControlPacket::Description(vec![chunk]));
        }
        packets.push(ControlPacket::Goodbye(Goodbye::new(local_id, reason.map(str::to_string))));
        self.send_control_packet(&packets)
    }

    fn write_datagram(&self, kind: ChannelKind, datagram: &[u8], destination: SocketAddr) -> bool {
        let channel = match self.channels.read().as_ref() {
            Some(channels) => channels.get(kind).clone(),
            None => return false,
        };
        match channel.send_to(datagram, destination) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(session = %self.name, channel = kind.as_str(), "{}", e);
                false
            }
        }
    }

    /// Receive loop step for one datagram. Failures inside processing
    /// terminate the session with the failure as cause.
    pub(crate) fn process_datagram(&self, kind: ChannelKind, datagram: Bytes, source: SocketAddr) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle_datagram(kind, datagram, source)));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            tracing::error!(session = %self.name, channel = kind.as_str(), "Receive loop failed: {}", message);
            self.terminate_with(Some(SessionError::Internal(message)));
        }
        self.complete_deferred_termination();
    }

    /// Fatal socket error on a receive loop
    pub(crate) fn receive_failed(&self, kind: ChannelKind, error: &std::io::Error) {
        tracing::error!(session = %self.name, channel = kind.as_str(), "Receive error: {}", error);
        self.terminate_with(Some(SessionError::Receive(format!("{} channel: {}", kind.as_str(), error))));
    }

    /// Decode, validate, update state, dispatch
    fn handle_datagram(&self, kind: ChannelKind, datagram: Bytes, source: SocketAddr) {
        let _scope = DispatchScope::enter(self);
        if !self.is_running() {
            return;
        }

        match kind {
            ChannelKind::Data => match decode_data(datagram) {
                Ok(packet) => self.data_packet_received(packet, source),
                Err(e) => tracing::debug!(session = %self.name, %source, "Dropping malformed data packet: {}", e),
            },
            ChannelKind::Control => match decode_control(datagram) {
                Ok(packets) => {
                    for packet in packets {
                        if !self.is_running() {
                            break;
                        }
                        self.control_packet_received(packet, source);
                    }
                }
                Err(e) => tracing::debug!(session = %self.name, %source, "Dropping malformed control packet: {}", e),
            },
        }
    }

    fn data_packet_received(&self, packet: DataPacket, source: SocketAddr) {
        if packet.sender_id == 0 {
            tracing::debug!(session = %self.name, %source, "Dropping data packet without sender identifier");
            return;
        }

        let (collision, joined, rebound, remote) = {
            let mut participants = self.participants.lock();
            if !self.is_running() {
                return;
            }
            if !participants.accepts(packet.sender_id) {
                drop(participants);
                tracing::debug!(
                    session = %self.name,
                    sender_id = packet.sender_id,
                    "Discarding data packet from unexpected sender"
                );
                return;
            }
            let collision = participants.resolve_collision(packet.sender_id);
            let joined = !participants.remote_established;
            if joined {
                participants.establish_remote(packet.sender_id);
            }
            let rebound = participants.remote.rebind_data(source);
            (collision, joined, rebound, participants.remote.clone())
        };

        if let Some((old_id, new_id)) = collision {
            self.collision_resolved(old_id, new_id);
        }
        if joined {
            tracing::info!(session = %self.name, remote = %remote, "Participant joined from data");
            self.notify("joined_from_data", |listener| listener.on_joined_from_data(self, &remote, &packet));
        }
        if rebound {
            tracing::info!(session = %self.name, address = %source, "Remote data address re-bound");
            self.notify("participant_updated", |listener| listener.on_participant_updated(self, &remote));
        }

        // a join or update callback may have terminated the session
        if !self.is_running() {
            return;
        }
        tracing::trace!(session = %self.name, "Received {}", packet);
        self.data_packets_delivered.fetch_add(1, Ordering::Relaxed);
        self.data_listeners
            .dispatch("data", || self.is_running(), |listener| listener.on_data(self, &remote, &packet));
    }

    fn control_packet_received(&self, packet: ControlPacket, source: SocketAddr) {
        match packet {
            ControlPacket::Description(chunks) => {
                for chunk in chunks {
                    if !self.is_running() {
                        break;
                    }
                    self.control_chunk_received(chunk, source);
                }
            }
            ControlPacket::Goodbye(goodbye) => self.goodbye_received(goodbye, source),
            ControlPacket::Other { packet_type } => {
                tracing::trace!(session = %self.name, packet_type, "Ignoring control packet");
            }
        }
    }

    fn control_chunk_received(&self, chunk: ControlChunk, source: SocketAddr) {
        if chunk.sender_id == 0 {
            tracing::debug!(session = %self.name, %source, "Dropping description without sender identifier");
            return;
        }

        let (collision, joined, updated, remote) = {
            let mut participants = self.participants.lock();
            if !self.is_running() {
                return;
            }
            if !participants.accepts(chunk.sender_id) {
                drop(participants);
                tracing::debug!(
                    session = %self.name,
                    sender_id = chunk.sender_id,
                    "Discarding description from unexpected sender"
                );
                return;
            }
            let collision = participants.resolve_collision(chunk.sender_id);
            let joined = !participants.remote_established;
            let updated = if joined {
                participants.establish_remote(chunk.sender_id);
                participants.remote.merge_description(&chunk);
                participants.remote.rebind_control(source)
            } else {
                let rebound = participants.remote.rebind_control(source);
                let described = participants.remote.merge_description(&chunk);
                rebound || described
            };
            (collision, joined, updated, participants.remote.clone())
        };

        if let Some((old_id, new_id)) = collision {
            self.collision_resolved(old_id, new_id);
        }
        self.control_packets_delivered.fetch_add(1, Ordering::Relaxed);
        if joined {
            tracing::info!(session = %self.name, remote = %remote, "Participant joined from control");
            self.notify("joined_from_control", |listener| listener.on_joined_from_control(self, &remote, &chunk));
        }
        if updated {
            tracing::debug!(session = %self.name, remote = %remote, "Remote participant updated");
            self.notify("participant_updated", |listener| listener.on_participant_updated(self, &remote));
        }
    }

    fn goodbye_received(&self, goodbye: Goodbye, source: SocketAddr) {
        let left = {
            let mut participants = self.participants.lock();
            if !self.is_running() {
                return;
            }
            let leaving = participants.remote_established
                && participants
                    .remote
                    .id()
                    .is_some_and(|id| goodbye.sender_ids.contains(&id));
            if leaving {
                participants.remote_established = false;
                Some(participants.remote.clone())
            } else {
                None
            }
        };

        match left {
            Some(remote) => {
                self.control_packets_delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    session = %self.name,
                    remote = %remote,
                    reason = goodbye.reason.as_deref().unwrap_or(""),
                    "Participant left"
                );
                self.notify("participant_left", |listener| listener.on_participant_left(self, &remote));
            }
            None => {
                tracing::debug!(session = %self.name, %source, "Ignoring goodbye for unknown participant");
            }
        }
    }

    fn collision_resolved(&self, old_id: u32, new_id: u32) {
        self.collisions_resolved.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session = %self.name,
            "Resolved identifier collision, local identifier was {:#010x} and now is {:#010x}",
            old_id,
            new_id
        );
        self.notify("collision_resolved", |listener| listener.on_collision_resolved(self, old_id, new_id));
    }

    fn notify<F>(&self, event: &'static str, call: F)
    where
        F: FnMut(&(dyn EventListener + 'static)),
    {
        self.event_listeners.dispatch(event, || self.is_running(), call);
    }
}

impl Drop for SingleParticipantSession {
    fn drop(&mut self) {
        self.terminate_with(None);
    }
}

fn receive_loop(weak: Weak<SingleParticipantSession>, channel: Arc<UdpChannel>, kind: ChannelKind) {
    let mut buf = vec![0u8; channel.datagram_buffer_len()];

    loop {
        let received = channel.recv_from(&mut buf);

        let Some(session) = weak.upgrade() else {
            break;
        };
        if !session.is_running() {
            break;
        }

        match received {
            Ok(Some((size, source))) => {
                session.process_datagram(kind, Bytes::copy_from_slice(&buf[..size]), source);
            }
            Ok(None) => {}
            Err(ref e) if is_transient(e) => {
                tracing::debug!(session = %session.name, channel = kind.as_str(), "Transient receive error: {}", e);
            }
            Err(e) => {
                session.receive_failed(kind, &e);
                break;
            }
        }
    }

    tracing::debug!(channel = kind.as_str(), "Receive loop stopped");
}
