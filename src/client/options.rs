//! Manager, socket and connection options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockeye::{ConnectOptions, ManagerOptions, SocketOptions};
//!
//! let options = ConnectOptions::new()
//!     .with_manager(
//!         ManagerOptions::new()
//!             .with_reconnection_attempts(5)
//!             .with_reconnection_delay(Duration::from_millis(500)),
//!     )
//!     .with_socket(SocketOptions::new().with_retries(3))
//!     .with_force_new();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::transport::EngineOptions;

// ============================================================================
// Constants
// ============================================================================

/// Default Socket.IO request path.
pub const DEFAULT_SOCKET_PATH: &str = "/socket.io";

/// Default delay before the first reconnection attempt.
pub const DEFAULT_RECONNECTION_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound on the reconnection delay.
pub const DEFAULT_RECONNECTION_DELAY_MAX: Duration = Duration::from_millis(5000);

/// Default reconnection jitter.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(20_000);

// ============================================================================
// ManagerOptions
// ============================================================================

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Options of every engine connection the manager opens.
    pub engine: EngineOptions,
    /// Reconnect after an unexpected close.
    pub reconnection: bool,
    /// Give up after this many attempts; `None` retries forever.
    pub reconnection_attempts: Option<u32>,
    /// Initial reconnection delay.
    pub reconnection_delay: Duration,
    /// Upper bound on the reconnection delay.
    pub reconnection_delay_max: Duration,
    /// Jitter applied to each delay, in `0.0..=1.0`.
    pub randomization_factor: f64,
    /// Connect timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Open as soon as a socket is created.
    pub auto_connect: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::new().with_path(DEFAULT_SOCKET_PATH),
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay: DEFAULT_RECONNECTION_DELAY,
            reconnection_delay_max: DEFAULT_RECONNECTION_DELAY_MAX,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            auto_connect: true,
        }
    }
}

impl ManagerOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine options.
    #[inline]
    #[must_use]
    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    /// Enables or disables reconnection.
    #[inline]
    #[must_use]
    pub fn with_reconnection(mut self, enabled: bool) -> Self {
        self.reconnection = enabled;
        self
    }

    /// Limits the number of reconnection attempts.
    #[inline]
    #[must_use]
    pub fn with_reconnection_attempts(mut self, attempts: u32) -> Self {
        self.reconnection_attempts = Some(attempts);
        self
    }

    /// Sets the initial reconnection delay.
    #[inline]
    #[must_use]
    pub fn with_reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }

    /// Sets the maximum reconnection delay.
    #[inline]
    #[must_use]
    pub fn with_reconnection_delay_max(mut self, delay: Duration) -> Self {
        self.reconnection_delay_max = delay;
        self
    }

    /// Sets the reconnection jitter.
    #[inline]
    #[must_use]
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disables the connect timeout.
    #[inline]
    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Enables or disables auto-connect.
    #[inline]
    #[must_use]
    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a randomization factor outside
    /// `0.0..=1.0`, or invalid engine options.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(Error::config(format!(
                "randomization factor must be within 0..=1, got {}",
                self.randomization_factor
            )));
        }
        self.engine.validate()
    }
}

// ============================================================================
// SocketOptions
// ============================================================================

/// Per-namespace socket configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketOptions {
    /// Payload sent with every CONNECT packet.
    pub auth: Option<JsonValue>,
    /// Deliver emits through the retry queue with this many retries.
    pub retries: Option<u32>,
    /// Default acknowledgement timeout.
    pub ack_timeout: Option<Duration>,
}

impl SocketOptions {
    /// Creates options with defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the CONNECT payload.
    #[inline]
    #[must_use]
    pub fn with_auth(mut self, auth: JsonValue) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Enables the retry queue.
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the default acknowledgement timeout.
    #[inline]
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `auth` is not a JSON object.
    pub fn validate(&self) -> Result<()> {
        match &self.auth {
            Some(auth) if !auth.is_object() => Err(Error::config("auth must be a JSON object")),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// ConnectOptions
// ============================================================================

/// Options for [`crate::connect`] and [`crate::Client::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Manager options, used when a new manager is created.
    pub manager: ManagerOptions,
    /// Socket options.
    pub socket: SocketOptions,
    /// Always create a new manager.
    pub force_new: bool,
    /// Share managers between connections to the same endpoint.
    pub multiplex: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            manager: ManagerOptions::default(),
            socket: SocketOptions::default(),
            force_new: false,
            multiplex: true,
        }
    }
}

impl ConnectOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the manager options.
    #[inline]
    #[must_use]
    pub fn with_manager(mut self, manager: ManagerOptions) -> Self {
        self.manager = manager;
        self
    }

    /// Sets the socket options.
    #[inline]
    #[must_use]
    pub fn with_socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// Always creates a new manager.
    #[inline]
    #[must_use]
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Enables or disables manager sharing.
    #[inline]
    #[must_use]
    pub fn with_multiplex(mut self, multiplex: bool) -> Self {
        self.multiplex = multiplex;
        self
    }

    /// Validates manager and socket options.
    ///
    /// # Errors
    ///
    /// See [`ManagerOptions::validate`] and [`SocketOptions::validate`].
    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;
        self.socket.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_manager_defaults() {
        let options = ManagerOptions::new();
        assert!(options.reconnection);
        assert_eq!(options.reconnection_attempts, None);
        assert_eq!(options.reconnection_delay, Duration::from_millis(1000));
        assert_eq!(options.reconnection_delay_max, Duration::from_millis(5000));
        assert_eq!(options.timeout, Some(Duration::from_millis(20_000)));
        assert_eq!(options.engine.path, "/socket.io");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_randomization_factor_is_bounded() {
        let options = ManagerOptions::new().with_randomization_factor(1.5);
        assert!(matches!(options.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_auth_must_be_object() {
        assert!(SocketOptions::new().with_auth(json!("token")).validate().is_err());
        assert!(
            SocketOptions::new()
                .with_auth(json!({"token": "abc"}))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_connect_options_builder() {
        let options = ConnectOptions::new()
            .with_force_new()
            .with_multiplex(false)
            .with_socket(SocketOptions::new().with_retries(2));
        assert!(options.force_new);
        assert!(!options.multiplex);
        assert_eq!(options.socket.retries, Some(2));
        assert!(options.validate().is_ok());
    }
}
