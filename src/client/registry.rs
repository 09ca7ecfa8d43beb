//! Manager registry.
//!
//! A [`Client`] caches one [`Manager`] per endpoint so that sockets for
//! different namespaces of the same server share a single engine
//! connection.
//!
//! # Reuse Rules
//!
//! | Condition | Manager |
//! |-----------|---------|
//! | `force_new` | new, not cached |
//! | `multiplex == false` | new, not cached |
//! | namespace already has a live socket on the cached manager | new, not cached |
//! | otherwise | cached, created on first use |
//!
//! Managers are keyed by scheme, host, port and engine path.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::packet::DEFAULT_NAMESPACE;

use super::manager::Manager;
use super::options::ConnectOptions;
use super::socket::Socket;

// ============================================================================
// ParsedUri
// ============================================================================

/// Connection URI split into endpoint and namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    /// Full URL, with a scheme added if it had none.
    pub url: Url,
    /// `scheme://host:port`, with the default port made explicit.
    pub id: String,
    /// Namespace taken from the URL path.
    pub nsp: String,
}

impl ParsedUri {
    /// Parses `uri`.
    ///
    /// A URI without scheme is treated as `https`; `//host` keeps its
    /// authority and gets `https:` prepended.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the URI does not parse
    /// - [`Error::Config`] if it has no host
    pub fn parse(uri: &str) -> Result<Self> {
        let has_scheme = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| {
                uri.get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
            });
        let url = if has_scheme {
            Url::parse(uri)?
        } else if let Some(rest) = uri.strip_prefix("//") {
            Url::parse(&format!("https://{rest}"))?
        } else {
            Url::parse(&format!("https://{uri}"))?
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("URI has no host: {uri}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("URI has no port: {uri}")))?;
        let id = format!("{}://{host}:{port}", url.scheme());

        let nsp = match url.path() {
            "" => DEFAULT_NAMESPACE.to_string(),
            path => path.to_string(),
        };

        Ok(Self { url, id, nsp })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Explicit cache of managers.
///
/// # Example
///
/// ```ignore
/// let client = Client::new();
/// let chat = client.connect("http://localhost:3000/chat", ConnectOptions::new())?;
/// let news = client.connect("http://localhost:3000/news", ConnectOptions::new())?;
/// assert_eq!(chat.manager(), news.manager());
/// ```
#[derive(Default)]
pub struct Client {
    managers: RwLock<FxHashMap<String, Manager>>,
}

impl Client {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a socket for the namespace in `uri`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the URI does not parse
    /// - [`Error::Config`] if the options are invalid
    pub fn connect(&self, uri: &str, options: ConnectOptions) -> Result<Socket> {
        let parsed = ParsedUri::parse(uri)?;
        options.validate()?;
        let key = cache_key(&parsed, &options);

        let ConnectOptions {
            manager: manager_options,
            socket: socket_options,
            force_new,
            multiplex,
        } = options;

        let same_namespace = self
            .lookup(&key)
            .is_some_and(|manager| manager.has_namespace(&parsed.nsp));

        let manager = if force_new || !multiplex || same_namespace {
            debug!(
                id = %parsed.id,
                nsp = %parsed.nsp,
                force_new,
                multiplex,
                same_namespace,
                "Creating dedicated manager"
            );
            Manager::new(parsed.url.as_str(), manager_options)?
        } else {
            let mut managers = self.managers.write();
            match managers.get(&key) {
                Some(manager) => manager.clone(),
                None => {
                    debug!(%key, "Caching new manager");
                    let manager = Manager::new(parsed.url.as_str(), manager_options)?;
                    managers.insert(key, manager.clone());
                    manager
                }
            }
        };

        Ok(manager.socket(&parsed.nsp, socket_options))
    }

    /// Returns the cached manager for `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Manager> {
        self.managers.read().get(key).cloned()
    }

    /// Removes and closes the cached manager for `key`.
    ///
    /// Returns `false` if nothing was cached.
    pub fn evict(&self, key: &str) -> bool {
        let Some(manager) = self.managers.write().remove(key) else {
            return false;
        };
        debug!(%key, "Evicting manager");
        manager.close();
        true
    }

    /// Keys of the cached managers.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.managers.read().keys().cloned().collect()
    }

    /// Number of cached managers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.read().len()
    }

    /// Returns `true` if no manager is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.read().is_empty()
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Returns a socket for the namespace in `uri` on a dedicated manager.
///
/// Nothing is cached; use a [`Client`] to share managers between
/// namespaces.
///
/// Must be called within a tokio runtime.
///
/// # Errors
///
/// See [`Client::connect`].
pub fn connect(uri: &str, options: ConnectOptions) -> Result<Socket> {
    let parsed = ParsedUri::parse(uri)?;
    options.validate()?;
    let manager = Manager::new(parsed.url.as_str(), options.manager)?;
    Ok(manager.socket(&parsed.nsp, options.socket))
}

/// Registry key for a parsed URI and the engine path it will use.
#[must_use]
pub fn cache_key(parsed: &ParsedUri, options: &ConnectOptions) -> String {
    format!("{}{}", parsed.id, options.manager.engine.path)
}

// ============================================================================
// Tests
// ============================================================================
