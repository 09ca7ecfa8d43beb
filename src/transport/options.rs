//! Engine connection configuration.
//!
//! [`EngineOptions`] is what callers configure; [`TransportOptions`] is the
//! resolved, per-connection view every transport reads when building its
//! request URI.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use crate::error::{Error, Result};

use super::polling::{HttpClient, ReqwestClient};
use super::webtransport::WebTransportConnector;
use super::{TransportName, TransportRegistry};

// ============================================================================
// Constants
// ============================================================================

/// Default request path.
pub const DEFAULT_PATH: &str = "/engine.io";

/// Default cache-busting query key.
pub const DEFAULT_TIMESTAMP_PARAM: &str = "t";

// ============================================================================
// TransportOptions
// ============================================================================

/// Resolved endpoint and encoding settings shared by all transports of one
/// engine connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Server host name or IP literal.
    pub hostname: String,
    /// Server port; elided from URIs when it is the scheme default.
    pub port: Option<u16>,
    /// Use `https`/`wss`.
    pub secure: bool,
    /// Request path, including any trailing slash.
    pub path: String,
    /// Add a timestamp to every request. `None` uses the transport default.
    pub timestamp_requests: Option<bool>,
    /// Query key of the timestamp.
    pub timestamp_param: String,
    /// Whether binary frames may be sent raw.
    pub supports_binary: bool,
}

// ============================================================================
// EngineOptions
// ============================================================================

/// Engine connection configuration.
///
/// # Example
///
/// ```ignore
/// use sockeye::transport::{EngineOptions, TransportName};
///
/// let options = EngineOptions::new()
///     .with_path("/socket.io")
///     .with_transports([TransportName::WebSocket]);
/// ```
#[derive(Clone)]
pub struct EngineOptions {
    /// Request path.
    pub path: String,
    /// Extra query parameters, sent in order.
    pub query: Vec<(String, String)>,
    /// Transports to try, in order of preference.
    pub transports: Vec<TransportName>,
    /// Whether to probe for better transports after opening.
    pub upgrade: bool,
    /// Skip straight to WebSocket after a previous successful upgrade.
    pub remember_upgrade: bool,
    /// Add a timestamp to every request. `None` uses the transport default.
    pub timestamp_requests: Option<bool>,
    /// Query key of the timestamp.
    pub timestamp_param: String,
    /// Append `/` to the path.
    pub add_trailing_slash: bool,
    /// On failure before the handshake, try the next transport in the list.
    pub try_all_transports: bool,
    /// Whether binary frames may be sent raw.
    pub supports_binary: bool,
    /// HTTP client used by the polling transport.
    pub http_client: Option<Arc<dyn HttpClient>>,
    /// Connector enabling the WebTransport transport.
    pub webtransport: Option<Arc<dyn WebTransportConnector>>,
    /// Replaces the standard transport table.
    pub registry: Option<TransportRegistry>,
    /// Whether a WebSocket upgrade has succeeded before. Shared by every
    /// connection built from clones of these options.
    pub(crate) upgrade_memory: Arc<AtomicBool>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            query: Vec::new(),
            transports: vec![
                TransportName::Polling,
                TransportName::WebSocket,
                TransportName::WebTransport,
            ],
            upgrade: true,
            remember_upgrade: false,
            timestamp_requests: None,
            timestamp_param: DEFAULT_TIMESTAMP_PARAM.to_string(),
            add_trailing_slash: true,
            try_all_transports: false,
            supports_binary: true,
            http_client: None,
            webtransport: None,
            registry: None,
            upgrade_memory: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("path", &self.path)
            .field("query", &self.query)
            .field("transports", &self.transports)
            .field("upgrade", &self.upgrade)
            .field("remember_upgrade", &self.remember_upgrade)
            .field("timestamp_requests", &self.timestamp_requests)
            .field("add_trailing_slash", &self.add_trailing_slash)
            .field("try_all_transports", &self.try_all_transports)
            .field("supports_binary", &self.supports_binary)
            .field("webtransport", &self.webtransport.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Builder Methods
    // ========================================================================

    /// Sets the request path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the ordered transport list.
    #[must_use]
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = TransportName>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    /// Enables or disables upgrades.
    #[must_use]
    pub fn with_upgrade(mut self, upgrade: bool) -> Self {
        self.upgrade = upgrade;
        self
    }

    /// Enables or disables upgrade memory.
    #[must_use]
    pub fn with_remember_upgrade(mut self, remember: bool) -> Self {
        self.remember_upgrade = remember;
        self
    }

    /// Forces request timestamps on or off.
    #[must_use]
    pub fn with_timestamp_requests(mut self, enabled: bool) -> Self {
        self.timestamp_requests = Some(enabled);
        self
    }

    /// Sets the timestamp query key.
    #[must_use]
    pub fn with_timestamp_param(mut self, param: impl Into<String>) -> Self {
        self.timestamp_param = param.into();
        self
    }

    /// Enables or disables the trailing slash.
    #[must_use]
    pub fn with_trailing_slash(mut self, enabled: bool) -> Self {
        self.add_trailing_slash = enabled;
        self
    }

    /// Enables or disables falling back through the transport list.
    #[must_use]
    pub fn with_try_all_transports(mut self, enabled: bool) -> Self {
        self.try_all_transports = enabled;
        self
    }

    /// Declares whether binary frames may be sent raw.
    #[must_use]
    pub fn with_binary_support(mut self, supported: bool) -> Self {
        self.supports_binary = supported;
        self
    }

    /// Sets the HTTP client used for polling.
    #[must_use]
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Enables WebTransport through `connector`.
    #[must_use]
    pub fn with_webtransport(mut self, connector: Arc<dyn WebTransportConnector>) -> Self {
        self.webtransport = Some(connector);
        self
    }

    /// Replaces the transport table.
    #[must_use]
    pub fn with_registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a path without a leading slash or an
    /// empty timestamp parameter.
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "path must start with '/': {:?}",
                self.path
            )));
        }
        if self.timestamp_param.is_empty() {
            return Err(Error::config("timestamp parameter must not be empty"));
        }
        Ok(())
    }

    /// Returns the transport table to use.
    #[must_use]
    pub fn resolve_registry(&self) -> TransportRegistry {
        if let Some(registry) = &self.registry {
            return registry.clone();
        }
        let http: Arc<dyn HttpClient> = match &self.http_client {
            Some(client) => Arc::clone(client),
            None => Arc::new(ReqwestClient::new()),
        };
        TransportRegistry::standard(http, self.webtransport.clone())
    }

    /// Resolves endpoint settings for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `url` has no host.
    pub fn resolve_transport_options(&self, url: &Url) -> Result<TransportOptions> {
        let hostname = url
            .host_str()
            .ok_or_else(|| Error::config(format!("url has no host: {url}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let secure = matches!(url.scheme(), "https" | "wss");
        let port = url.port().or(if secure { Some(443) } else { Some(80) });

        let mut path = self.path.trim_end_matches('/').to_string();
        if self.add_trailing_slash {
            path.push('/');
        }
        if path.is_empty() {
            path.push('/');
        }

        Ok(TransportOptions {
            hostname,
            port,
            secure,
            path,
            timestamp_requests: self.timestamp_requests,
            timestamp_param: self.timestamp_param.clone(),
            supports_binary: self.supports_binary,
        })
    }

    /// Returns the configured query merged with the one embedded in `url`.
    #[must_use]
    pub fn resolve_query(&self, url: &Url) -> Vec<(String, String)> {
        let mut query = self.query.clone();
        for (k, v) in url.query_pairs() {
            if !query.iter().any(|(existing, _)| *existing == k) {
                query.push((k.into_owned(), v.into_owned()));
            }
        }
        query
    }

    pub(crate) fn upgrade_remembered(&self) -> bool {
        self.remember_upgrade && self.upgrade_memory.load(Ordering::SeqCst)
    }

    pub(crate) fn set_upgrade_remembered(&self, succeeded: bool) {
        self.upgrade_memory.store(succeeded, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::new();
        assert_eq!(options.path, "/engine.io");
        assert!(options.upgrade);
        assert!(options.add_trailing_slash);
        assert_eq!(options.transports.len(), 3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        assert!(EngineOptions::new().with_path("socket.io").validate().is_err());
        assert!(
            EngineOptions::new()
                .with_timestamp_param("")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_resolve_transport_options() {
        let url = Url::parse("https://example.com/chat?token=x").unwrap();
        let resolved = EngineOptions::new()
            .with_path("/socket.io")
            .resolve_transport_options(&url)
            .unwrap();
        assert_eq!(resolved.hostname, "example.com");
        assert_eq!(resolved.port, Some(443));
        assert!(resolved.secure);
        assert_eq!(resolved.path, "/socket.io/");

        let resolved = EngineOptions::new()
            .with_trailing_slash(false)
            .resolve_transport_options(&Url::parse("http://[::1]:3000").unwrap())
            .unwrap();
        assert_eq!(resolved.hostname, "::1");
        assert_eq!(resolved.port, Some(3000));
        assert_eq!(resolved.path, "/engine.io");
    }

    #[test]
    fn test_resolve_query_merges_url_query() {
        let url = Url::parse("http://localhost/?token=abc&room=1").unwrap();
        let query = EngineOptions::new()
            .with_query("room", "2")
            .resolve_query(&url);
        assert_eq!(
            query,
            vec![
                ("room".to_string(), "2".to_string()),
                ("token".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_upgrade_memory_is_shared_between_clones() {
        let options = EngineOptions::new().with_remember_upgrade(true);
        let clone = options.clone();
        assert!(!clone.upgrade_remembered());
        options.set_upgrade_remembered(true);
        assert!(clone.upgrade_remembered());
    }
}
