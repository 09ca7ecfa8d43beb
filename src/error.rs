//! Error types for the client stack.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use sockeye::Result;
//!
//! async fn example(socket: &sockeye::Socket) -> Result<()> {
//!     let reply = socket
//!         .timeout(std::time::Duration::from_secs(5))
//!         .emit_await("ping", vec![])
//!         .await?;
//!     println!("{reply:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ConnectError`] |
//! | Transport | [`Error::Transport`] |
//! | Protocol | [`Error::Protocol`], [`Error::ReservedEvent`] |
//! | Acknowledgement | [`Error::AckTimeout`], [`Error::Disconnected`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// TransportError
// ============================================================================

/// Failure raised by a single transport.
///
/// Fatal only to the transport that raised it. The engine connection
/// escalates it into its own close with reason "transport error".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Short machine-friendly reason, e.g. `"xhr poll error"`.
    pub reason: String,
    /// Human readable description of the underlying failure.
    pub description: Option<String>,
    /// Raw context (status code, close frame, ...).
    pub context: Option<String>,
}

impl TransportError {
    /// Creates a transport error with only a reason.
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            description: None,
            context: None,
        }
    }

    /// Attaches a description.
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl fmt::Display) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Attaches raw context.
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: impl fmt::Display) -> Self {
        self.context = Some(context.to_string());
        self
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TransportError {}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// URI could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection was not established within the connect timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while an operation was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The server refused the namespace connection.
    #[error("Connect error: {message}")]
    ConnectError {
        /// Message sent by the server.
        message: String,
        /// Optional extra data sent by the server.
        data: Option<serde_json::Value>,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// A transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or undecodable packet.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Attempt to emit an event whose name is reserved.
    #[error("\"{event}\" is a reserved event name")]
    ReservedEvent {
        /// The rejected event name.
        event: String,
    },

    // ========================================================================
    // Acknowledgement Errors
    // ========================================================================
    /// No acknowledgement arrived in time.
    #[error("Operation has timed out after {timeout_ms}ms")]
    AckTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The socket disconnected before the acknowledgement arrived.
    #[error("Socket has been disconnected")]
    Disconnected,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a connect error from the server payload.
    #[inline]
    pub fn connect_error(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::ConnectError {
            message: message.into(),
            data,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a reserved event error.
    #[inline]
    pub fn reserved_event(event: impl Into<String>) -> Self {
        Self::ReservedEvent {
            event: event.into(),
        }
    }

    /// Creates an acknowledgement timeout error.
    #[inline]
    pub fn ack_timeout(timeout_ms: u64) -> Self {
        Self::AckTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::AckTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Transport(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::AckTimeout { .. }
                | Self::Transport(_)
                | Self::Connection { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_reserved_event_display() {
        let err = Error::reserved_event("connect");
        assert_eq!(err.to_string(), "\"connect\" is a reserved event name");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new("xhr poll error").with_description("status 500");
        assert_eq!(err.to_string(), "xhr poll error: status 500");

        let wrapped: Error = err.into();
        assert!(wrapped.is_connection_error());
        assert!(wrapped.is_recoverable());
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connection_timeout(20_000).is_timeout());
        assert!(Error::ack_timeout(50).is_timeout());
        assert!(!Error::Disconnected.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_protocol_errors_are_not_recoverable() {
        assert!(!Error::protocol("unknown packet type 9").is_recoverable());
        assert!(!Error::reserved_event("disconnect").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
