//! Socket.IO client.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Manager`] | Owns the engine connection, reconnects it, multiplexes namespaces |
//! | [`Socket`] | One namespace: events, acknowledgements, retry queue |
//! | [`Client`] | Cache of managers keyed by endpoint |
//!
//! # Example
//!
//! ```no_run
//! use sockeye::{Client, ConnectOptions, Result, Value};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::new();
//! let socket = client.connect("http://localhost:3000/chat", ConnectOptions::new())?;
//!
//! socket.on("message", |message| println!("{:?}", message.args));
//! let reply = socket.emit_await("hello", vec![Value::from("world")]).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Reconnection backoff.
pub mod backoff;

/// Connection manager.
pub mod manager;

/// Manager, socket and connection options.
pub mod options;

/// Manager registry.
pub mod registry;

/// Namespaced socket.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{Backoff, ReconnectAction, ReconnectInput, ReconnectState, Reconnector};
pub use manager::{Manager, ManagerEvent, ManagerState};
pub use options::{ConnectOptions, ManagerOptions, SocketOptions};
pub use registry::{Client, ParsedUri, cache_key, connect};
pub use socket::{AckCallback, AckSender, EmitBuilder, Message, Socket};
