//! Data packets
//!
//! ## Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     sender identifier (SSRC)                  |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            CSRC list (CC entries, skipped on decode)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        header extension (if X, skipped on decode)             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           payload ...                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use super::PROTOCOL_VERSION;
use crate::error::CodecError;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 12;

const PADDING_BIT: u8 = 0x20;
const EXTENSION_BIT: u8 = 0x10;
const CSRC_COUNT_MASK: u8 = 0x0F;
const MARKER_BIT: u8 = 0x80;
const PAYLOAD_TYPE_MASK: u8 = 0x7F;

/// Largest payload type the 7-bit header field can carry
pub const MAX_PAYLOAD_TYPE: u8 = PAYLOAD_TYPE_MASK;

/// Media packet exchanged on the data channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataPacket {
    /// Payload type (0-127)
    pub payload_type: u8,

    /// Marker bit, meaning depends on the payload type
    pub marker: bool,

    /// Sequence number, wraps at 65535
    pub sequence_number: u16,

    /// Media timestamp
    pub timestamp: u32,

    /// Identifier of the sending participant
    pub sender_id: u32,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl DataPacket {
    /// Create a packet carrying `payload`; every header field starts at zero
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_sender_id(mut self, sender_id: u32) -> Self {
        self.sender_id = sender_id;
        self
    }

    /// Serialize packet to bytes for network transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_size());

        buf.put_u8(PROTOCOL_VERSION << 6);
        let marker = if self.marker { MARKER_BIT } else { 0 };
        buf.put_u8(marker | (self.payload_type & PAYLOAD_TYPE_MASK));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.sender_id);
        buf.put_slice(&self.payload);

        buf.freeze()
    }

    /// Deserialize packet from bytes.
    ///
    /// CSRC entries and header extensions are skipped, padding is stripped.
    /// The payload shares the input buffer.
    pub fn decode(mut data: Bytes) -> Result<Self, CodecError> {
        let available = data.len();
        if available < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                available,
            });
        }

        let first = data.get_u8();
        let version = first >> 6;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let second = data.get_u8();
        let sequence_number = data.get_u16();
        let timestamp = data.get_u32();
        let sender_id = data.get_u32();

        let mut needed = HEADER_SIZE + (first & CSRC_COUNT_MASK) as usize * 4;
        if available < needed {
            return Err(CodecError::Truncated { needed, available });
        }
        data.advance(needed - HEADER_SIZE);

        if first & EXTENSION_BIT != 0 {
            needed += 4;
            if available < needed {
                return Err(CodecError::Truncated { needed, available });
            }
            let _profile = data.get_u16();
            let extension_len = data.get_u16() as usize * 4;
            needed += extension_len;
            if available < needed {
                return Err(CodecError::Truncated { needed, available });
            }
            data.advance(extension_len);
        }

        if first & PADDING_BIT != 0 {
            let remaining = data.len();
            let padding = match data.last() {
                Some(&count) => count as usize,
                None => return Err(CodecError::InvalidLength("padding flag without padding")),
            };
            if padding == 0 || padding > remaining {
                return Err(CodecError::InvalidLength("padding exceeds packet"));
            }
            data.truncate(remaining - padding);
        }

        Ok(Self {
            payload_type: second & PAYLOAD_TYPE_MASK,
            marker: second & MARKER_BIT != 0,
            sequence_number,
            timestamp,
            sender_id,
            payload: data,
        })
    }

    /// Get packet size including header
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Display for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataPacket{{pt={}, seq={}, ts={}, sender={:#010x}, marker={}, payload={}B}}",
            self.payload_type,
            self.sequence_number,
            self.timestamp,
            self.sender_id,
            self.marker,
            self.payload.len()
        )
    }
}

/// Encode a data packet for the data channel
pub fn encode_data(packet: &DataPacket) -> Bytes {
    packet.encode()
}

/// Decode a datagram received on the data channel
pub fn decode_data(data: Bytes) -> Result<DataPacket, CodecError> {
    DataPacket::decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packet_serialization() {
        let packet = DataPacket::new(vec![0x45, 0x45, 0x45, 0x45])
            .with_timestamp(6969)
            .with_marker(true)
            .with_sender_id(0xDEADBEEF);
        let packet = DataPacket {
            payload_type: 8,
            sequence_number: 65535,
            ..packet
        };

        let encoded = packet.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 4);
        assert_eq!(&encoded[..4], &[0x80, 0x88, 0xFF, 0xFF]);

        let decoded = decode_data(encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_skips_csrc_extension_and_padding() {
        let mut buf = BytesMut::new();
        // V=2, P=1, X=1, CC=2
        buf.put_u8(0x80 | PADDING_BIT | EXTENSION_BIT | 2);
        buf.put_u8(96);
        buf.put_u16(7);
        buf.put_u32(1000);
        buf.put_u32(0x01020304);
        buf.put_u32(0xAAAAAAAA);
        buf.put_u32(0xBBBBBBBB);
        // extension: profile + one word
        buf.put_u16(0xBEDE);
        buf.put_u16(1);
        buf.put_u32(0xCCCCCCCC);
        buf.put_slice(&[1, 2, 3]);
        // three bytes of padding, count in the last one
        buf.put_slice(&[0, 0, 3]);

        let packet = decode_data(buf.freeze()).unwrap();
        assert_eq!(packet.payload_type, 96);
        assert_eq!(packet.sequence_number, 7);
        assert_eq!(packet.sender_id, 0x01020304);
        assert_eq!(packet.payload.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(
            decode_data(Bytes::from_static(&[0x80, 0x00, 0x00])),
            Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                available: 3
            })
        );

        let mut wrong_version = DataPacket::new(vec![1]).encode().to_vec();
        wrong_version[0] = 0x40;
        assert_eq!(
            decode_data(Bytes::from(wrong_version)),
            Err(CodecError::UnsupportedVersion(1))
        );

        // CC=3 but no CSRC entries present
        let mut missing_csrc = DataPacket::new(Bytes::new()).encode().to_vec();
        missing_csrc[0] |= 3;
        assert!(matches!(
            decode_data(Bytes::from(missing_csrc)),
            Err(CodecError::Truncated { needed: 24, .. })
        ));

        // padding count larger than what follows the header
        let mut bad_padding = DataPacket::new(vec![9, 9]).encode().to_vec();
        bad_padding[0] |= PADDING_BIT;
        bad_padding.push(200);
        assert!(matches!(
            decode_data(Bytes::from(bad_padding)),
            Err(CodecError::InvalidLength(_))
        ));
    }

    proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_data(Bytes::from(data));
        }
    }
}
