//! Wire protocol codecs.
//!
//! Two layers of packets travel on the wire:
//!
//! | Layer | Unit | Purpose |
//! |-------|------|---------|
//! | Engine | [`engine::Packet`] | transport negotiation, liveness, raw messages |
//! | Socket.IO | [`packet::Packet`] | namespaces, events, acknowledgements |
//!
//! Socket.IO packets are carried as the payload of Engine `message`
//! packets. Binary leaves in Socket.IO data travel as extra Engine
//! messages following the header.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `engine` | Engine packet text codec and polling payloads |
//! | `framing` | Length-prefixed framing for byte streams |
//! | `value` | Data tree with binary leaves |
//! | `binary` | Placeholder deconstruction / reconstruction |
//! | `packet` | Socket.IO packet encoder and decoder |

// ============================================================================
// Submodules
// ============================================================================

/// Binary attachment deconstruction and reconstruction.
pub mod binary;

/// Engine packet codec.
pub mod engine;

/// Stream framing for duplex byte streams.
pub mod framing;

/// Socket.IO packet codec.
pub mod packet;

/// Socket.IO data tree.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{Frame, PacketData, PacketType};
pub use framing::{StreamDecoder, encode_frame};
pub use packet::{Decoder, Packet, PacketKind, RESERVED_EVENTS, is_reserved_event};
pub use value::Value;
