//! Control packets
//!
//! A control datagram is a compound of RTCP packets sharing one header
//! layout:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  count  |      PT       |   length (32-bit words - 1)   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Only SDES (202) and BYE (203) bodies are interpreted. Every other packet
//! type is reported as [`ControlPacket::Other`] and skipped using its length.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use super::PROTOCOL_VERSION;
use crate::error::CodecError;

/// Source description packet type
pub const PACKET_TYPE_SDES: u8 = 202;

/// Goodbye packet type
pub const PACKET_TYPE_BYE: u8 = 203;

/// Header size in bytes
pub const HEADER_SIZE: usize = 4;

/// Chunks / identifiers per packet are limited by the 5-bit count field
const MAX_COUNT: usize = 31;

const PADDING_BIT: u8 = 0x20;
const COUNT_MASK: u8 = 0x1F;
const MAX_TEXT_LEN: usize = 255;

/// Source description item types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SdesItem {
    /// Canonical end-point identifier
    Cname = 1,
    /// User name
    Name = 2,
    Email = 3,
    Phone = 4,
    /// Geographic location
    Location = 5,
    /// Application or tool name
    Tool = 6,
    /// Notice / status
    Note = 7,
}

impl TryFrom<u8> for SdesItem {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Cname),
            2 => Ok(Self::Name),
            3 => Ok(Self::Email),
            4 => Ok(Self::Phone),
            5 => Ok(Self::Location),
            6 => Ok(Self::Tool),
            7 => Ok(Self::Note),
            _ => Err(()),
        }
    }
}

/// Session description of one participant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlChunk {
    /// Identifier of the described participant
    pub sender_id: u32,

    /// Description items, at most one value per item type
    pub attributes: BTreeMap<SdesItem, String>,
}

impl ControlChunk {
    pub fn new(sender_id: u32) -> Self {
        Self {
            sender_id,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_item(mut self, item: SdesItem, value: impl Into<String>) -> Self {
        self.attributes.insert(item, value.into());
        self
    }

    pub fn get(&self, item: SdesItem) -> Option<&str> {
        self.attributes.get(&item).map(String::as_str)
    }
}

/// Participants leaving the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Goodbye {
    pub sender_ids: Vec<u32>,
    pub reason: Option<String>,
}

impl Goodbye {
    pub fn new(sender_id: u32, reason: Option<String>) -> Self {
        Self {
            sender_ids: vec![sender_id],
            reason,
        }
    }
}

/// One packet of a compound control datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    /// SDES: one chunk per described participant
    Description(Vec<ControlChunk>),
    /// BYE
    Goodbye(Goodbye),
    /// Any other packet type (reports, APP, ...), body not interpreted
    Other { packet_type: u8 },
}

/// Encode a compound control datagram
pub fn encode_control(packets: &[ControlPacket]) -> Bytes {
    let mut buf = BytesMut::new();

    for packet in packets {
        match packet {
            ControlPacket::Description(chunks) => {
                for group in chunks.chunks(MAX_COUNT) {
                    let start = begin_packet(&mut buf, group.len(), PACKET_TYPE_SDES);
                    for chunk in group {
                        put_chunk(&mut buf, chunk);
                    }
                    finish_packet(&mut buf, start);
                }
            }
            ControlPacket::Goodbye(goodbye) => {
                // the reason rides on the last packet only
                let groups: Vec<&[u32]> = if goodbye.sender_ids.is_empty() {
                    vec![&goodbye.sender_ids[..]]
                } else {
                    goodbye.sender_ids.chunks(MAX_COUNT).collect()
                };
                let last = groups.len() - 1;
                for (index, ids) in groups.into_iter().enumerate() {
                    let start = begin_packet(&mut buf, ids.len(), PACKET_TYPE_BYE);
                    for id in ids {
                        buf.put_u32(*id);
                    }
                    match goodbye.reason.as_deref() {
                        Some(reason) if index == last && !reason.is_empty() => {
                            let text = clamp_text(reason);
                            buf.put_u8(text.len() as u8);
                            buf.put_slice(text);
                            pad_to_word(&mut buf, start);
                        }
                        _ => {}
                    }
                    finish_packet(&mut buf, start);
                }
            }
            ControlPacket::Other { packet_type } => {
                let start = begin_packet(&mut buf, 0, *packet_type);
                finish_packet(&mut buf, start);
            }
        }
    }

    buf.freeze()
}

/// Decode a compound control datagram
pub fn decode_control(data: Bytes) -> Result<Vec<ControlPacket>, CodecError> {
    let available = data.len();
    if available < HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE,
            available,
        });
    }

    let mut packets = Vec::new();
    let mut offset = 0;

    while offset < available {
        if available - offset < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: offset + HEADER_SIZE,
                available,
            });
        }

        let first = data[offset];
        let version = first >> 6;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let count = (first & COUNT_MASK) as usize;
        let packet_type = data[offset + 1];
        let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;

        let packet_len = (length + 1) * 4;
        if offset + packet_len > available {
            return Err(CodecError::Truncated {
                needed: offset + packet_len,
                available,
            });
        }

        let mut body = &data[offset + HEADER_SIZE..offset + packet_len];
        if first & PADDING_BIT != 0 {
            let padding = body.last().copied().unwrap_or(0) as usize;
            if padding == 0 || padding > body.len() {
                return Err(CodecError::InvalidLength("padding exceeds packet"));
            }
            body = &body[..body.len() - padding];
        }

        let packet = match packet_type {
            PACKET_TYPE_SDES => ControlPacket::Description(decode_chunks(body, count)?),
            PACKET_TYPE_BYE => ControlPacket::Goodbye(decode_goodbye(body, count)?),
            other => ControlPacket::Other { packet_type: other },
        };
        packets.push(packet);
        offset += packet_len;
    }

    Ok(packets)
}

fn begin_packet(buf: &mut BytesMut, count: usize, packet_type: u8) -> usize {
    let start = buf.len();
    buf.put_u8((PROTOCOL_VERSION << 6) | (count as u8 & COUNT_MASK));
    buf.put_u8(packet_type);
    // length, patched by finish_packet
    buf.put_u16(0);
    start
}

fn finish_packet(buf: &mut BytesMut, start: usize) {
    let words = ((buf.len() - start) / 4 - 1) as u16;
    buf[start + 2..start + 4].copy_from_slice(&words.to_be_bytes());
}

fn pad_to_word(buf: &mut BytesMut, start: usize) {
    while (buf.len() - start) % 4 != 0 {
        buf.put_u8(0);
    }
}

fn put_chunk(buf: &mut BytesMut, chunk: &ControlChunk) {
    let start = buf.len();
    buf.put_u32(chunk.sender_id);
    for (item, value) in &chunk.attributes {
        let text = clamp_text(value);
        buf.put_u8(*item as u8);
        buf.put_u8(text.len() as u8);
        buf.put_slice(text);
    }
    // item list terminator, then pad to a word boundary
    buf.put_u8(0);
    pad_to_word(buf, start);
}

/// Longest prefix of `text` that fits an item and ends on a char boundary
fn clamp_text(text: &str) -> &[u8] {
    if text.len() <= MAX_TEXT_LEN {
        return text.as_bytes();
    }
    let mut end = MAX_TEXT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text.as_bytes()[..end]
}

fn truncated(needed: usize, body: &[u8]) -> CodecError {
    CodecError::Truncated {
        needed: HEADER_SIZE + needed,
        available: HEADER_SIZE + body.len(),
    }
}

fn decode_chunks(body: &[u8], count: usize) -> Result<Vec<ControlChunk>, CodecError> {
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;

    for _ in 0..count {
        if body.len() < offset + 4 {
            return Err(truncated(offset + 4, body));
        }
        let sender_id = u32::from_be_bytes([
            body[offset],
            body[offset + 1],
            body[offset + 2],
            body[offset + 3],
        ]);
        offset += 4;

        let mut chunk = ControlChunk::new(sender_id);
        loop {
            let Some(&kind) = body.get(offset) else {
                return Err(truncated(offset + 1, body));
            };
            if kind == 0 {
                offset += 1;
                break;
            }
            let Some(&len) = body.get(offset + 1) else {
                return Err(truncated(offset + 2, body));
            };
            let text_start = offset + 2;
            let text_end = text_start + len as usize;
            if text_end > body.len() {
                return Err(truncated(text_end, body));
            }
            // PRIV and unknown items are skipped
            if let Ok(item) = SdesItem::try_from(kind) {
                let text = std::str::from_utf8(&body[text_start..text_end])
                    .map_err(|_| CodecError::InvalidText)?;
                chunk.attributes.insert(item, text.to_string());
            }
            offset = text_end;
        }

        // chunks start on word boundaries
        offset = ((offset + 3) & !3).min(body.len());
        chunks.push(chunk);
    }

    Ok(chunks)
}

fn decode_goodbye(body: &[u8], count: usize) -> Result<Goodbye, CodecError> {
    let ids_len = count * 4;
    if body.len() < ids_len {
        return Err(truncated(ids_len, body));
    }

    let sender_ids = body[..ids_len]
        .chunks_exact(4)
        .map(|id| u32::from_be_bytes([id[0], id[1], id[2], id[3]]))
        .collect();

    let reason = match body.get(ids_len) {
        Some(&len) if len > 0 => {
            let start = ids_len + 1;
            let end = start + len as usize;
            if end > body.len() {
                return Err(truncated(end, body));
            }
            let text = std::str::from_utf8(&body[start..end]).map_err(|_| CodecError::InvalidText)?;
            Some(text.to_string())
        }
        _ => None,
    };

    Ok(Goodbye { sender_ids, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_description_compound() {
        let packets = vec![ControlPacket::Description(vec![
            ControlChunk::new(1)
                .with_item(SdesItem::Cname, "session1@127.0.0.1")
                .with_item(SdesItem::Tool, "rtp-duo"),
            ControlChunk::new(2).with_item(SdesItem::Name, "Микрофон"),
        ])];

        let encoded = encode_control(&packets);
        assert_eq!(encoded.len() % 4, 0);
        assert_eq!(encoded[0], 0x80 | 2);
        assert_eq!(encoded[1], PACKET_TYPE_SDES);

        let decoded = decode_control(encoded).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn test_goodbye_followed_by_unknown_packet() {
        let packets = vec![
            ControlPacket::Goodbye(Goodbye::new(0xCAFEBABE, Some("terminated".to_string()))),
            ControlPacket::Other { packet_type: 201 },
        ];

        let decoded = decode_control(encode_control(&packets)).unwrap();
        assert_eq!(decoded, packets);

        let silent = vec![ControlPacket::Goodbye(Goodbye::new(9, None))];
        let decoded = decode_control(encode_control(&silent)).unwrap();
        assert_eq!(decoded, silent);
    }

    #[test]
    fn test_goodbye_with_many_sources_is_split() {
        let goodbye = Goodbye {
            sender_ids: (1..=40).collect(),
            reason: Some("shutdown".to_string()),
        };

        let decoded = decode_control(encode_control(&[ControlPacket::Goodbye(goodbye)])).unwrap();
        assert_eq!(decoded.len(), 2);
        let (ControlPacket::Goodbye(first), ControlPacket::Goodbye(second)) = (&decoded[0], &decoded[1]) else {
            panic!("expected two goodbyes, got {:?}", decoded);
        };
        assert_eq!(first.sender_ids, (1..=31).collect::<Vec<u32>>());
        assert_eq!(first.reason, None);
        assert_eq!(second.sender_ids, (32..=40).collect::<Vec<u32>>());
        assert_eq!(second.reason.as_deref(), Some("shutdown"));
    }

    #[test]
    fn test_empty_goodbye_reason_is_omitted() {
        let empty = encode_control(&[ControlPacket::Goodbye(Goodbye::new(9, Some(String::new())))]);
        let none = encode_control(&[ControlPacket::Goodbye(Goodbye::new(9, None))]);
        assert_eq!(empty, none);
        assert_eq!(empty.len(), 8);
    }

    #[test]
    fn test_report_packets_are_skipped() {
        // Empty receiver report (RR, PT=201) from sender 0x11223344, then an SDES
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);
        buf.put_u8(201);
        buf.put_u16(1);
        buf.put_u32(0x11223344);
        let chunk = ControlChunk::new(0x11223344).with_item(SdesItem::Cname, "x");
        buf.put_slice(&encode_control(&[ControlPacket::Description(vec![chunk])]));

        let decoded = decode_control(buf.freeze()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], ControlPacket::Other { packet_type: 201 });
        match &decoded[1] {
            ControlPacket::Description(chunks) => {
                assert_eq!(chunks[0].sender_id, 0x11223344);
                assert_eq!(chunks[0].get(SdesItem::Cname), Some("x"));
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_long_text_is_clamped() {
        let long = "é".repeat(200);
        let packets = vec![ControlPacket::Description(vec![
            ControlChunk::new(3).with_item(SdesItem::Note, long.clone()),
        ])];

        let decoded = decode_control(encode_control(&packets)).unwrap();
        let ControlPacket::Description(chunks) = &decoded[0] else {
            panic!("expected description");
        };
        let note = chunks[0].get(SdesItem::Note).unwrap();
        assert_eq!(note.len(), 254);
        assert!(long.starts_with(note));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode_control(Bytes::from_static(&[0x80, 202])),
            Err(CodecError::Truncated { .. })
        ));

        // length claims two more words than present
        assert!(matches!(
            decode_control(Bytes::from_static(&[0x81, 202, 0, 2, 0, 0, 0, 1])),
            Err(CodecError::Truncated { needed: 12, available: 8 })
        ));

        assert_eq!(
            decode_control(Bytes::from_static(&[0x00, 202, 0, 0])),
            Err(CodecError::UnsupportedVersion(0))
        );

        // chunk without item terminator
        assert!(matches!(
            decode_control(Bytes::from_static(&[0x81, 202, 0, 1, 0, 0, 0, 1])),
            Err(CodecError::Truncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_control(Bytes::from(data));
        }
    }
}
