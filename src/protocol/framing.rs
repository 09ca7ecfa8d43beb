//! Length-prefixed framing for duplex byte streams.
//!
//! Used by the WebTransport transport, where packets travel over a single
//! bidirectional stream instead of discrete messages.
//!
//! # Header
//!
//! ```text
//! length < 126        [len]                     1 byte
//! length < 65536      [126][u16 big-endian]     3 bytes
//! otherwise           [127][u64 big-endian]     9 bytes
//! ```
//!
//! The most significant bit of the first byte is set when the payload is
//! raw binary. Text payloads carry the usual type digit + data encoding.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{Error, Result};

use super::engine::{Packet, PacketData, decode_text, encode_packet_text};

// ============================================================================
// Constants
// ============================================================================

/// Flag set in the first header byte for binary payloads.
const BINARY_FLAG: u8 = 0x80;

/// Marker for a 16-bit extended length.
const EXT16_MARKER: u8 = 126;

/// Marker for a 64-bit extended length.
const EXT64_MARKER: u8 = 127;

/// Largest length a 64-bit header may announce (2^53 - 1).
const MAX_SAFE_LENGTH: u64 = (1 << 53) - 1;

// ============================================================================
// Encoder
// ============================================================================

/// Encodes one packet as header + payload.
#[must_use]
pub fn encode_frame(packet: &Packet) -> Bytes {
    let (payload, binary) = match &packet.data {
        Some(PacketData::Binary(bytes)) => (bytes.clone(), true),
        _ => (Bytes::from(encode_packet_text(packet)), false),
    };

    let len = payload.len();
    let mut out = BytesMut::with_capacity(len + 9);
    if len < usize::from(EXT16_MARKER) {
        out.put_u8(len as u8);
    } else if len < 65_536 {
        out.put_u8(EXT16_MARKER);
        out.put_u16(len as u16);
    } else {
        out.put_u8(EXT64_MARKER);
        out.put_u64(len as u64);
    }
    if binary {
        out[0] |= BINARY_FLAG;
    }
    out.extend_from_slice(&payload);
    out.freeze()
}

// ============================================================================
// StreamDecoder
// ============================================================================

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadHeader,
    ReadExt16,
    ReadExt64,
    ReadPayload,
    /// Terminal: a framing error was reported.
    Failed,
}

/// Incremental frame decoder.
///
/// Bytes may be pushed in chunks split at arbitrary boundaries; complete
/// packets are returned as soon as their last byte arrives. A zero length
/// or a length above `max_payload` is a terminal error: the decoder
/// reports it once and then stays failed until [`StreamDecoder::reset`].
#[derive(Debug)]
pub struct StreamDecoder {
    max_payload: u64,
    buffer: BytesMut,
    state: State,
    expected: u64,
    binary: bool,
}

impl StreamDecoder {
    /// Creates a decoder rejecting frames larger than `max_payload`.
    #[must_use]
    pub fn new(max_payload: u64) -> Self {
        Self {
            max_payload,
            buffer: BytesMut::new(),
            state: State::ReadHeader,
            expected: 0,
            binary: false,
        }
    }

    /// Returns `true` once a framing error has been reported.
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// Discards buffered bytes and returns to the initial state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::ReadHeader;
        self.expected = 0;
        self.binary = false;
    }

    /// Feeds a chunk and returns every packet it completes.
    ///
    /// A framing or decoding error is returned as the last element.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Packet>> {
        let mut out = Vec::new();
        if self.state == State::Failed {
            return out;
        }
        self.buffer.extend_from_slice(chunk);

        loop {
            match self.state {
                State::ReadHeader => {
                    if self.buffer.is_empty() {
                        break;
                    }
                    let header = self.buffer.get_u8();
                    self.binary = header & BINARY_FLAG == BINARY_FLAG;
                    self.expected = u64::from(header & !BINARY_FLAG);
                    self.state = match header & !BINARY_FLAG {
                        EXT16_MARKER => State::ReadExt16,
                        EXT64_MARKER => State::ReadExt64,
                        _ => State::ReadPayload,
                    };
                }
                State::ReadExt16 => {
                    if self.buffer.len() < 2 {
                        break;
                    }
                    self.expected = u64::from(self.buffer.get_u16());
                    self.state = State::ReadPayload;
                }
                State::ReadExt64 => {
                    if self.buffer.len() < 8 {
                        break;
                    }
                    let length = self.buffer.get_u64();
                    if length > MAX_SAFE_LENGTH {
                        out.push(Err(self.fail(length)));
                        break;
                    }
                    self.expected = length;
                    self.state = State::ReadPayload;
                }
                State::ReadPayload => {
                    if (self.buffer.len() as u64) < self.expected {
                        break;
                    }
                    let payload = self.buffer.split_to(self.expected as usize).freeze();
                    out.push(self.decode(payload));
                    self.state = State::ReadHeader;
                }
                State::Failed => break,
            }

            if self.state != State::ReadHeader
                && (self.expected == 0 || self.expected > self.max_payload)
            {
                out.push(Err(self.fail(self.expected)));
                break;
            }
        }
        out
    }

    fn decode(&self, payload: Bytes) -> Result<Packet> {
        if self.binary {
            return Ok(Packet::message(payload));
        }
        let text = std::str::from_utf8(&payload)
            .map_err(|e| Error::protocol(format!("invalid UTF-8 in text frame: {e}")))?;
        decode_text(text)
    }

    fn fail(&mut self, length: u64) -> Error {
        warn!(length, max = self.max_payload, "Invalid frame length");
        self.state = State::Failed;
        self.buffer.clear();
        Error::protocol(format!("invalid frame length {length}"))
    }
}

// ============================================================================
// Tests
// ============================================================================
