//! Sockeye - Socket.IO client for tokio.
//!
//! This library connects to Socket.IO servers over HTTP long-polling,
//! WebSocket or WebTransport, upgrading to the best transport the server
//! offers.
//!
//! # Architecture
//!
//! The client is layered the way the protocol is:
//!
//! - **Engine connection**: one session over one transport at a time, with
//!   heartbeats, write buffering and transport upgrades
//! - **Manager**: owns the engine connection, reconnects it with backoff and
//!   multiplexes namespaces over it
//! - **Socket**: one namespace, with events, acknowledgements and an
//!   optional retry queue
//!
//! Key design principles:
//!
//! - Engine connections and managers are tasks driven by a `select!` loop;
//!   their handles are cheap to clone
//! - Sockets keep their manager alive; the manager only holds weak
//!   references to its sockets
//! - Event-driven listeners (no polling from application code)
//!
//! # Quick Start
//!
//! ```no_run
//! use sockeye::{ConnectOptions, Result, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let socket = sockeye::connect("http://localhost:3000", ConnectOptions::new())?;
//!
//!     socket.on("connect", |_| println!("connected"));
//!     socket.on("news", |message| println!("news: {:?}", message.args));
//!
//!     let reply = socket
//!         .timeout(std::time::Duration::from_secs(5))
//!         .emit_await("hello", vec![Value::from("world")])
//!         .await?;
//!     println!("Server replied: {reply:?}");
//!
//!     socket.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Manager`], [`Socket`] and the [`Client`] registry |
//! | [`emitter`] | Listener lists |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Engine and Socket.IO codecs |
//! | [`transport`] | Transports and the engine connection |

// ============================================================================
// Modules
// ============================================================================

/// Socket.IO client: managers, sockets and the manager registry.
pub mod client;

/// Listener lists shared by managers and sockets.
pub mod emitter;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Engine and Socket.IO wire codecs.
pub mod protocol;

/// Transports and the engine connection.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    AckSender, Client, ConnectOptions, EmitBuilder, Manager, ManagerEvent, ManagerOptions,
    ManagerState, Message, Socket, SocketOptions, connect,
};

// Emitter types
pub use emitter::ListenerId;

// Error types
pub use error::{Error, Result, TransportError};

// Identifier types
pub use identifiers::AckId;

// Protocol types
pub use protocol::{PacketData, Value};

// Transport types
pub use transport::{EngineConnection, EngineEvent, EngineOptions, TransportName};
