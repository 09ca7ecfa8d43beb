//! Socket.IO packet codec.
//!
//! Socket.IO packets ride inside Engine `message` packets. The text header
//! has the form:
//!
//! ```text
//! <type>[<attachments>-][<namespace>,][<ack id>][<json data>]
//! ```
//!
//! | Digit | Type |
//! |-------|------|
//! | `0` | CONNECT |
//! | `1` | DISCONNECT |
//! | `2` | EVENT |
//! | `3` | ACK |
//! | `4` | CONNECT_ERROR |
//! | `5` | BINARY_EVENT |
//! | `6` | BINARY_ACK |
//!
//! Packets carrying binary leaves are sent as a header frame followed by one
//! raw frame per leaf.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::AckId;

use super::binary::{deconstruct, reconstruct};
use super::engine::PacketData;
use super::value::Value;

// ============================================================================
// Constants
// ============================================================================

/// Event names that applications may neither emit nor receive.
pub const RESERVED_EVENTS: &[&str] = &[
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// The default namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Returns `true` if `event` is reserved.
#[inline]
#[must_use]
pub fn is_reserved_event(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

// ============================================================================
// PacketKind
// ============================================================================

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Namespace connection request / confirmation.
    Connect,
    /// Namespace disconnection.
    Disconnect,
    /// Application event.
    Event,
    /// Acknowledgement of an event.
    Ack,
    /// Namespace connection refused.
    ConnectError,
    /// Event carrying binary attachments.
    BinaryEvent,
    /// Acknowledgement carrying binary attachments.
    BinaryAck,
}

impl PacketKind {
    /// Returns the wire digit.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Connect => 0,
            Self::Disconnect => 1,
            Self::Event => 2,
            Self::Ack => 3,
            Self::ConnectError => 4,
            Self::BinaryEvent => 5,
            Self::BinaryAck => 6,
        }
    }

    /// Parses an ASCII wire digit.
    #[inline]
    #[must_use]
    pub const fn from_ascii(b: u8) -> Option<Self> {
        match b {
            b'0' => Some(Self::Connect),
            b'1' => Some(Self::Disconnect),
            b'2' => Some(Self::Event),
            b'3' => Some(Self::Ack),
            b'4' => Some(Self::ConnectError),
            b'5' => Some(Self::BinaryEvent),
            b'6' => Some(Self::BinaryAck),
            _ => None,
        }
    }

    /// Returns `true` for the attachment-carrying types.
    #[inline]
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Event => "EVENT",
            Self::Ack => "ACK",
            Self::ConnectError => "CONNECT_ERROR",
            Self::BinaryEvent => "BINARY_EVENT",
            Self::BinaryAck => "BINARY_ACK",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet type.
    pub kind: PacketKind,
    /// Target namespace.
    pub nsp: String,
    /// Payload.
    pub data: Option<Value>,
    /// Acknowledgement id.
    pub id: Option<AckId>,
    /// Number of binary attachments following the header.
    pub attachments: usize,
}

impl Packet {
    /// Creates a packet for `nsp` without payload.
    #[must_use]
    pub fn new(kind: PacketKind, nsp: impl Into<String>) -> Self {
        Self {
            kind,
            nsp: nsp.into(),
            data: None,
            id: None,
            attachments: 0,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the acknowledgement id.
    #[must_use]
    pub fn with_id(mut self, id: AckId) -> Self {
        self.id = Some(id);
        self
    }

    /// Creates an EVENT packet from an event name and arguments.
    #[must_use]
    pub fn event(nsp: impl Into<String>, event: impl Into<String>, args: Vec<Value>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(event.into()));
        data.extend(args);
        Self::new(PacketKind::Event, nsp).with_data(Value::Array(data))
    }

    /// Creates an ACK packet.
    #[must_use]
    pub fn ack(nsp: impl Into<String>, id: AckId, args: Vec<Value>) -> Self {
        Self::new(PacketKind::Ack, nsp)
            .with_data(Value::Array(args))
            .with_id(id)
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Encodes a packet into one or more Engine message payloads.
///
/// EVENT and ACK packets whose data contains binary leaves are promoted to
/// their binary variants; the first payload is the text header, each
/// following payload is one attachment.
#[must_use]
pub fn encode(packet: &Packet) -> Vec<PacketData> {
    let promote = matches!(packet.kind, PacketKind::Event | PacketKind::Ack)
        && packet.data.as_ref().is_some_and(Value::has_binary);

    if !promote {
        return vec![PacketData::Text(encode_as_string(packet))];
    }

    let (data, buffers) = deconstruct(packet.data.clone().unwrap_or_default());
    let header = Packet {
        kind: if packet.kind == PacketKind::Event {
            PacketKind::BinaryEvent
        } else {
            PacketKind::BinaryAck
        },
        nsp: packet.nsp.clone(),
        data: Some(data),
        id: packet.id,
        attachments: buffers.len(),
    };

    let mut out = Vec::with_capacity(buffers.len() + 1);
    out.push(PacketData::Text(encode_as_string(&header)));
    out.extend(buffers.into_iter().map(PacketData::Binary));
    out
}

fn encode_as_string(packet: &Packet) -> String {
    let mut out = packet.kind.as_u8().to_string();
    if packet.kind.is_binary() {
        out.push_str(&packet.attachments.to_string());
        out.push('-');
    }
    if packet.nsp != DEFAULT_NAMESPACE {
        out.push_str(&packet.nsp);
        out.push(',');
    }
    if let Some(id) = packet.id {
        out.push_str(&id.to_string());
    }
    if let Some(data) = &packet.data {
        out.push_str(&data.to_json().to_string());
    }
    trace!(encoded = %out, "Encoded packet");
    out
}

// ============================================================================
// Decoder
// ============================================================================

/// Stateful decoder turning Engine message payloads into packets.
///
/// Text payloads start a packet; binary payloads complete the attachments
/// of the pending binary packet. Any protocol violation is unrecoverable:
/// the caller is expected to reset the decoder and drop the connection.
#[derive(Debug, Default)]
pub struct Decoder {
    reconstructor: Option<BinaryReconstructor>,
}

impl Decoder {
    /// Creates an idle decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one payload.
    ///
    /// Returns `Ok(Some(packet))` once a full packet is available and
    /// `Ok(None)` while attachments are still missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on malformed headers, invalid payload
    /// shapes, text while attachments are pending, or binary data while
    /// no packet is being reconstructed.
    pub fn add(&mut self, data: PacketData) -> Result<Option<Packet>> {
        match data {
            PacketData::Text(text) => {
                if self.reconstructor.is_some() {
                    warn!("Text payload while reconstructing a binary packet");
                    return Err(Error::protocol(
                        "got plaintext data when reconstructing a packet",
                    ));
                }
                let packet = decode_string(&text)?;
                if packet.kind.is_binary() && packet.attachments > 0 {
                    self.reconstructor = Some(BinaryReconstructor::new(packet));
                    Ok(None)
                } else {
                    Ok(Some(packet))
                }
            }
            PacketData::Binary(bytes) => {
                let Some(reconstructor) = self.reconstructor.as_mut() else {
                    warn!("Binary payload with no pending packet");
                    return Err(Error::protocol(
                        "got binary data when not reconstructing a packet",
                    ));
                };
                match reconstructor.take_binary_data(bytes) {
                    Some(result) => {
                        self.reconstructor = None;
                        result.map(Some)
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Returns `true` while attachments are pending.
    #[inline]
    #[must_use]
    pub fn is_reconstructing(&self) -> bool {
        self.reconstructor.is_some()
    }

    /// Drops any partially reconstructed packet.
    pub fn reset(&mut self) {
        self.reconstructor = None;
    }
}

// ============================================================================
// BinaryReconstructor
// ============================================================================

/// Upper bound on the attachment slots reserved up front.
const MAX_PREALLOCATED_ATTACHMENTS: usize = 16;

/// Buffers attachments for one binary packet.
#[derive(Debug)]
pub struct BinaryReconstructor {
    packet: Packet,
    buffers: Vec<Bytes>,
}

impl BinaryReconstructor {
    /// Starts reconstructing `packet`.
    #[must_use]
    pub fn new(packet: Packet) -> Self {
        let capacity = packet.attachments.min(MAX_PREALLOCATED_ATTACHMENTS);
        Self {
            packet,
            buffers: Vec::with_capacity(capacity),
        }
    }

    /// Adds one attachment.
    ///
    /// Returns `Some` once all attachments are in: the packet with its
    /// placeholders substituted, or the substitution error.
    pub fn take_binary_data(&mut self, bytes: Bytes) -> Option<Result<Packet>> {
        self.buffers.push(bytes);
        if self.buffers.len() < self.packet.attachments {
            return None;
        }
        let mut packet = self.packet.clone();
        let result = match packet.data.take() {
            Some(data) => reconstruct(data, &self.buffers).map(|data| {
                packet.data = Some(data);
                packet
            }),
            None => Ok(packet),
        };
        Some(result)
    }
}

// ============================================================================
// String Decoding
// ============================================================================

fn decode_string(s: &str) -> Result<Packet> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    let kind = bytes
        .first()
        .and_then(|&b| PacketKind::from_ascii(b))
        .ok_or_else(|| Error::protocol(format!("unknown packet type in {s:?}")))?;
    let mut i = 1;

    let mut attachments = 0;
    if kind.is_binary() {
        let start = i;
        while i < len && bytes[i] != b'-' {
            i += 1;
        }
        let count = &s[start..i];
        if i >= len || count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::protocol("illegal attachments"));
        }
        attachments = count
            .parse()
            .map_err(|_| Error::protocol("illegal attachments"))?;
        // Every attachment needs a placeholder object in the header.
        if attachments > len {
            return Err(Error::protocol("illegal attachments"));
        }
        i += 1;
    }

    let mut nsp = DEFAULT_NAMESPACE;
    if i < len && bytes[i] == b'/' {
        let start = i;
        while i < len && bytes[i] != b',' {
            i += 1;
        }
        nsp = &s[start..i];
        if i < len {
            i += 1;
        }
    }

    let mut id = None;
    let start = i;
    while i < len && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        let raw: u64 = s[start..i]
            .parse()
            .map_err(|_| Error::protocol("invalid ack id"))?;
        id = Some(AckId::new(raw));
    }

    let mut data = None;
    let rest = &s[i..];
    if !rest.is_empty() {
        let payload: serde_json::Value =
            serde_json::from_str(rest).map_err(|_| Error::protocol("invalid payload"))?;
        if !is_payload_valid(kind, &payload) {
            return Err(Error::protocol(format!("invalid payload for {kind}")));
        }
        data = Some(Value::from(payload));
    }

    Ok(Packet {
        kind,
        nsp: nsp.to_string(),
        data,
        id,
        attachments,
    })
}

fn is_payload_valid(kind: PacketKind, payload: &serde_json::Value) -> bool {
    use serde_json::Value as Json;

    match kind {
        PacketKind::Connect => payload.is_object(),
        PacketKind::Disconnect => false,
        PacketKind::ConnectError => payload.is_string() || payload.is_object(),
        PacketKind::Event | PacketKind::BinaryEvent => match payload.as_array() {
            Some(items) => match items.first() {
                Some(Json::Number(_)) => true,
                Some(Json::String(name)) => !is_reserved_event(name),
                _ => false,
            },
            None => false,
        },
        PacketKind::Ack | PacketKind::BinaryAck => payload.is_array(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn text(data: &PacketData) -> &str {
        data.as_text().expect("text payload")
    }

    fn decode_one(s: &str) -> Result<Packet> {
        let mut decoder = Decoder::new();
        decoder.add(PacketData::Text(s.to_string())).map(|p| p.expect("complete packet"))
    }

    #[test]
    fn test_encode_connect_default_namespace() {
        let packet = Packet::new(PacketKind::Connect, "/");
        assert_eq!(text(&encode(&packet)[0]), "0");
    }

    #[test]
    fn test_encode_event_with_namespace_and_id() {
        let packet =
            Packet::event("/admin", "hello", vec![Value::from(1i64)]).with_id(AckId::new(12));
        let frames = encode(&packet);
        assert_eq!(frames.len(), 1);
        assert_eq!(text(&frames[0]), r#"2/admin,12["hello",1]"#);
    }

    #[test]
    fn test_encode_binary_event() {
        let packet = Packet::event("/", "upload", vec![Value::from(vec![1u8, 2])]);
        let frames = encode(&packet);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            text(&frames[0]),
            r#"51-["upload",{"_placeholder":true,"num":0}]"#
        );
        assert_eq!(frames[1], PacketData::Binary(Bytes::from_static(&[1, 2])));
    }

    #[test]
    fn test_decode_full_header() {
        let packet = decode_one(r#"2/chat,7["msg",{"a":1}]"#).unwrap();
        assert_eq!(packet.kind, PacketKind::Event);
        assert_eq!(packet.nsp, "/chat");
        assert_eq!(packet.id, Some(AckId::new(7)));
        assert_eq!(
            packet.data.unwrap().to_json(),
            json!(["msg", {"a": 1}])
        );
    }

    #[test]
    fn test_decode_namespace_without_payload() {
        let packet = decode_one("1/chat,").unwrap();
        assert_eq!(packet.kind, PacketKind::Disconnect);
        assert_eq!(packet.nsp, "/chat");
        assert!(packet.data.is_none());

        let packet = decode_one("0/chat").unwrap();
        assert_eq!(packet.nsp, "/chat");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode_one("9").is_err());
        assert!(decode_one("").is_err());
    }

    #[test]
    fn test_decode_validates_payload_shape() {
        assert!(decode_one(r#"0["not an object"]"#).is_err());
        assert!(decode_one(r#"1{}"#).is_err());
        assert!(decode_one(r#"2["connect"]"#).is_err());
        assert!(decode_one(r#"2{}"#).is_err());
        assert!(decode_one(r#"2[42,"numeric event"]"#).is_ok());
        assert!(decode_one(r#"3[]"#).is_ok());
        assert!(decode_one(r#"3{}"#).is_err());
        assert!(decode_one(r#"4"refused""#).is_ok());
        assert!(decode_one(r#"4{"message":"refused"}"#).is_ok());
        assert!(decode_one(r#"2["ok""#).is_err());
    }

    #[test]
    fn test_decode_rejects_illegal_attachments() {
        assert!(decode_one(r#"5x-["a"]"#).is_err());
        assert!(decode_one(r#"51["a"]"#).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_attachment_count() {
        let mut decoder = Decoder::new();
        let header = r#"59999999999999999999-["a",{"_placeholder":true,"num":0}]"#;
        assert!(decoder.add(PacketData::Text(header.into())).is_err());
        assert!(!decoder.is_reconstructing());

        let header = r#"61000000000-/chat,4["a",{"_placeholder":true,"num":0}]"#;
        assert!(decoder.add(PacketData::Text(header.into())).is_err());

        let mut packet = Packet::new(PacketKind::BinaryEvent, "/");
        packet.attachments = usize::MAX;
        let reconstructor = BinaryReconstructor::new(packet);
        assert!(reconstructor.buffers.capacity() <= MAX_PREALLOCATED_ATTACHMENTS);
    }

    #[test]
    fn test_binary_round_trip_through_decoder() {
        let packet = Packet::ack("/files", AckId::new(3), vec![
            Value::from(vec![9u8]),
            Value::from("meta"),
            Value::from(vec![8u8, 7]),
        ]);
        let frames = encode(&packet);
        assert_eq!(frames.len(), 3);

        let mut decoder = Decoder::new();
        assert!(decoder.add(frames[0].clone()).unwrap().is_none());
        assert!(decoder.is_reconstructing());
        assert!(decoder.add(frames[1].clone()).unwrap().is_none());
        let decoded = decoder.add(frames[2].clone()).unwrap().expect("complete");

        assert_eq!(decoded.kind, PacketKind::BinaryAck);
        assert_eq!(decoded.attachments, 2);
        assert_eq!(decoded.id, packet.id);
        assert_eq!(decoded.nsp, "/files");
        assert_eq!(decoded.data, packet.data);
        assert!(!decoder.is_reconstructing());
    }

    #[test]
    fn test_binary_without_pending_packet_is_violation() {
        let mut decoder = Decoder::new();
        assert!(decoder.add(PacketData::Binary(Bytes::from_static(b"x"))).is_err());
    }

    #[test]
    fn test_text_while_reconstructing_is_violation() {
        let mut decoder = Decoder::new();
        decoder
            .add(PacketData::Text(r#"51-["a",{"_placeholder":true,"num":0}]"#.into()))
            .unwrap();
        assert!(decoder.add(PacketData::Text("2[\"b\"]".into())).is_err());

        decoder.reset();
        assert!(decoder.add(PacketData::Text("2[\"b\"]".into())).unwrap().is_some());
    }

    #[test]
    fn test_binary_event_with_zero_attachments_is_immediate() {
        let packet = decode_one(r#"50-["a"]"#).unwrap();
        assert_eq!(packet.kind, PacketKind::BinaryEvent);
    }
}
