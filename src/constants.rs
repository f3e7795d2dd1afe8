//! Crate-wide defaults

/// Default local data (RTP) port
pub const DEFAULT_DATA_PORT: u16 = 6000;

/// Default local control (RTCP) port
pub const DEFAULT_CONTROL_PORT: u16 = 6001;

/// Default payload type (PCMA)
pub const DEFAULT_PAYLOAD_TYPE: u8 = 8;

/// Receive buffer for a single datagram, large enough for MTU + headers
pub const DEFAULT_DATAGRAM_BUFFER_LEN: usize = 2048;

/// Socket-level send buffer size
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 1024 * 1024;

/// Socket-level receive buffer size
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024 * 1024;

/// How long a receive loop blocks before re-checking the running flag
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 50;

/// Upper bound for a single datagram write
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 100;

/// Capacity of the channel behind an `EventForwarder`
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
