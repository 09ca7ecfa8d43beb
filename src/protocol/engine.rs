//! Engine packet codec.
//!
//! An Engine packet is a type digit followed by an optional payload:
//!
//! | Digit | Type |
//! |-------|------|
//! | `0` | open |
//! | `1` | close |
//! | `2` | ping |
//! | `3` | pong |
//! | `4` | message |
//! | `5` | upgrade |
//! | `6` | noop |
//!
//! Binary payloads travel as raw frames on binary-capable channels and as
//! `'b' + base64(payload)` on text-only channels. A long-polling payload
//! joins several encoded packets with the record separator `0x1E`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Separator between packets in a long-polling payload.
pub const SEPARATOR: char = '\u{1e}';

/// Engine.IO protocol revision sent in every query.
pub const PROTOCOL_VERSION: u8 = 4;

// ============================================================================
// PacketType
// ============================================================================

/// Engine packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Handshake sent by the server.
    Open,
    /// Request to close the transport.
    Close,
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Application data.
    Message,
    /// Transport upgrade confirmation.
    Upgrade,
    /// No-op, used to flush a pending poll.
    Noop,
}

impl PacketType {
    /// Every type, in wire order.
    pub const ALL: [PacketType; 7] = [
        Self::Open,
        Self::Close,
        Self::Ping,
        Self::Pong,
        Self::Message,
        Self::Upgrade,
        Self::Noop,
    ];

    /// Returns the ASCII digit used on the wire.
    #[inline]
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }

    /// Parses the wire digit.
    #[inline]
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Open),
            '1' => Some(Self::Close),
            '2' => Some(Self::Ping),
            '3' => Some(Self::Pong),
            '4' => Some(Self::Message),
            '5' => Some(Self::Upgrade),
            '6' => Some(Self::Noop),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        };
        f.write_str(name)
    }
}

// ============================================================================
// PacketData
// ============================================================================

/// Packet payload: text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketData {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl PacketData {
    /// Returns the text if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns `true` for binary payloads.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Approximate encoded size in bytes.
    ///
    /// Binary payloads are counted at their base64 size since they are
    /// escaped on text-only channels.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => (bytes.len() as f64 * 1.33).ceil() as usize,
        }
    }
}

impl From<&str> for PacketData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for PacketData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for PacketData {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Atomic Engine protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type.
    pub kind: PacketType,
    /// Optional payload.
    pub data: Option<PacketData>,
}

impl Packet {
    /// Creates a packet without payload.
    #[inline]
    #[must_use]
    pub const fn new(kind: PacketType) -> Self {
        Self { kind, data: None }
    }

    /// Creates a packet with payload.
    #[inline]
    #[must_use]
    pub fn with_data(kind: PacketType, data: impl Into<PacketData>) -> Self {
        Self {
            kind,
            data: Some(data.into()),
        }
    }

    /// Creates a message packet.
    #[inline]
    #[must_use]
    pub fn message(data: impl Into<PacketData>) -> Self {
        Self::with_data(PacketType::Message, data)
    }

    /// Returns the text payload, if any.
    #[inline]
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.data.as_ref().and_then(PacketData::as_text)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One encoded unit as it travels over a message-oriented channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a packet for a message-oriented channel.
///
/// Binary payloads are sent raw when `supports_binary` is set, otherwise
/// they are escaped as `'b' + base64`.
#[must_use]
pub fn encode_packet(packet: &Packet, supports_binary: bool) -> Frame {
    match &packet.data {
        Some(PacketData::Binary(bytes)) if supports_binary => Frame::Binary(bytes.clone()),
        _ => Frame::Text(encode_packet_text(packet)),
    }
}

/// Encodes a packet as text, escaping binary payloads.
#[must_use]
pub fn encode_packet_text(packet: &Packet) -> String {
    match &packet.data {
        Some(PacketData::Binary(bytes)) => format!("b{}", STANDARD.encode(bytes)),
        Some(PacketData::Text(text)) => {
            let mut out = String::with_capacity(text.len() + 1);
            out.push(packet.kind.as_char());
            out.push_str(text);
            out
        }
        None => packet.kind.as_char().to_string(),
    }
}

/// Joins several packets into one long-polling payload.
#[must_use]
pub fn encode_payload(packets: &[Packet]) -> String {
    let mut out = String::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(&encode_packet_text(packet));
    }
    out
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one frame received on a message-oriented channel.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for empty frames, unknown type digits and
/// invalid base64.
pub fn decode_packet(frame: Frame) -> Result<Packet> {
    match frame {
        Frame::Binary(bytes) => Ok(Packet::message(bytes)),
        Frame::Text(text) => decode_text(&text),
    }
}

/// Decodes one text-encoded packet.
///
/// # Errors
///
/// See [`decode_packet`].
pub fn decode_text(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return Err(Error::protocol("empty packet"));
    };

    if first == 'b' {
        let bytes = STANDARD
            .decode(chars.as_str())
            .map_err(|e| Error::protocol(format!("invalid base64 payload: {e}")))?;
        return Ok(Packet::message(Bytes::from(bytes)));
    }

    let kind = PacketType::from_char(first)
        .ok_or_else(|| Error::protocol(format!("unknown packet type {first:?}")))?;
    let rest = chars.as_str();
    if rest.is_empty() {
        Ok(Packet::new(kind))
    } else {
        Ok(Packet::with_data(kind, rest))
    }
}

/// Splits a long-polling payload into packets.
///
/// The iterator yields packets in order and stops after the first decode
/// error, which is yielded as the last item.
#[must_use]
pub fn decode_payload(payload: &str) -> PayloadDecoder<'_> {
    PayloadDecoder {
        parts: payload.split(SEPARATOR),
        failed: false,
    }
}

/// Iterator returned by [`decode_payload`].
#[derive(Debug)]
pub struct PayloadDecoder<'a> {
    parts: std::str::Split<'a, char>,
    failed: bool,
}

impl Iterator for PayloadDecoder<'_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let part = self.parts.next()?;
        let decoded = decode_text(part);
        if decoded.is_err() {
            self.failed = true;
        }
        Some(decoded)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_types() {
        for kind in PacketType::ALL {
            let bare = Packet::new(kind);
            assert_eq!(decode_text(&encode_packet_text(&bare)).unwrap(), bare);

            let with_text = Packet::with_data(kind, "payload");
            assert_eq!(decode_text(&encode_packet_text(&with_text)).unwrap(), with_text);
        }
    }

    #[test]
    fn test_encode_text_packet() {
        let packet = Packet::message("hello");
        assert_eq!(encode_packet(&packet, true), Frame::Text("4hello".into()));
        assert_eq!(encode_packet_text(&Packet::new(PacketType::Ping)), "2");
    }

    #[test]
    fn test_binary_is_escaped_on_text_channels() {
        let packet = Packet::message(Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(encode_packet_text(&packet), "bAQIDBA==");
        assert_eq!(decode_text("bAQIDBA==").unwrap(), packet);
    }

    #[test]
    fn test_binary_is_raw_on_binary_channels() {
        let packet = Packet::message(Bytes::from_static(&[9, 8]));
        let frame = encode_packet(&packet, true);
        assert_eq!(frame, Frame::Binary(Bytes::from_static(&[9, 8])));
        assert_eq!(decode_packet(frame).unwrap(), packet);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(decode_text("9oops").is_err());
        assert!(decode_text("").is_err());
        assert!(decode_text("b!!!").is_err());
    }

    #[test]
    fn test_payload_round_trip() {
        let packets = vec![
            Packet::message("a"),
            Packet::new(PacketType::Ping),
            Packet::message(Bytes::from_static(b"xyz")),
        ];
        let payload = encode_payload(&packets);
        assert_eq!(payload, "4a\u{1e}2\u{1e}beHl6");

        let decoded: Vec<Packet> = decode_payload(&payload).map(Result::unwrap).collect();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn test_payload_stops_at_first_error() {
        let decoded: Vec<_> = decode_payload("4a\u{1e}x\u{1e}4b").collect();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        assert!(decoded[1].is_err());
    }

    #[test]
    fn test_byte_len_counts_base64_overhead() {
        assert_eq!(PacketData::from("héllo").byte_len(), 6);
        assert_eq!(PacketData::Binary(Bytes::from_static(&[0; 3])).byte_len(), 4);
    }
}
