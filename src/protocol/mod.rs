//! Wire formats for the data and control channels
//!
//! Data packets follow the RTP fixed header (RFC 3550 §5.1), control packets
//! follow RTCP compound framing with SDES and BYE support (RFC 3550 §6).
//! All multi-byte fields are in network byte order.

pub mod control;
pub mod data;

pub use control::{decode_control, encode_control, ControlChunk, ControlPacket, Goodbye, SdesItem};
pub use data::{decode_data, encode_data, DataPacket, MAX_PAYLOAD_TYPE};

/// Protocol version carried in the first two bits of every packet
pub const PROTOCOL_VERSION: u8 = 2;
