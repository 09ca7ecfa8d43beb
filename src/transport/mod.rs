//! Transport layer.
//!
//! A transport is one duplex channel to the server. The engine connection
//! owns exactly one primary transport and, while upgrading, short-lived
//! probe transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  commands   ┌────────────────────┐   wire
//! │ EngineConnection │────────────►│ Transport I/O task │◄────────► server
//! │   (event loop)   │◄────────────│ (polling/ws/wt)    │
//! └──────────────────┘   events    └────────────────────┘
//!            (TransportId, TransportEvent) over one mpsc channel
//! ```
//!
//! Every event is tagged with the [`TransportId`] of its producer, so the
//! engine can stop listening to a transport simply by forgetting its id.
//!
//! # State Machine
//!
//! ```text
//! opening ──► open ──► pausing ──► paused
//!    │         │          │           │
//!    └─────────┴──────────┴───────────┴──► closed (terminal)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Engine connection event loop |
//! | `options` | Engine and transport configuration |
//! | `polling` | HTTP long-polling transport |
//! | `upgrade` | Upgrade probe state machine |
//! | `websocket` | WebSocket transport |
//! | `webtransport` | WebTransport stream transport |

// ============================================================================
// Submodules
// ============================================================================

/// Engine connection event loop.
pub mod connection;

/// Engine and transport configuration.
pub mod options;

/// HTTP long-polling transport.
pub mod polling;

/// Upgrade probe state machine.
pub mod upgrade;

/// WebSocket transport.
pub mod websocket;

/// WebTransport stream transport.
pub mod webtransport;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, TransportError};
use crate::identifiers::TransportId;
use crate::protocol::engine::{Frame, Packet, decode_packet};

pub use connection::{
    CloseReason, EngineConnection, EngineEvent, EngineEvents, HandshakeData, ReadyState,
};
pub use options::{EngineOptions, TransportOptions};
pub use polling::{HttpClient, PollingTransport, ReqwestClient};
pub use websocket::WebSocketTransport;
pub use webtransport::{BidiStream, WebTransportConnector, WebTransportTransport};

// ============================================================================
// TransportName
// ============================================================================

/// Name of a concrete transport, as used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportName {
    /// HTTP long-polling.
    Polling,
    /// WebSocket.
    WebSocket,
    /// WebTransport.
    WebTransport,
}

impl TransportName {
    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
            Self::WebTransport => "webtransport",
        }
    }
}

impl fmt::Display for TransportName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" => Ok(Self::Polling),
            "websocket" => Ok(Self::WebSocket),
            "webtransport" => Ok(Self::WebTransport),
            other => Err(Error::config(format!("unknown transport: {other}"))),
        }
    }
}

// ============================================================================
// TransportState
// ============================================================================

/// Transport lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Connecting.
    Opening,
    /// Ready for writes.
    Open,
    /// Waiting for in-flight requests before pausing.
    Pausing,
    /// Paused for an upgrade; no further I/O.
    Paused,
    /// Terminal.
    Closed,
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Event reported by a transport to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is established.
    Open,
    /// A packet arrived.
    Packet(Packet),
    /// The last write batch has been flushed.
    Drain,
    /// A requested pause has completed.
    Paused,
    /// The channel closed.
    Close {
        /// Why the channel closed.
        description: Option<String>,
    },
    /// The channel failed.
    Error(TransportError),
}

/// Sending half of the shared engine event channel.
pub type EventSender = mpsc::UnboundedSender<(TransportId, TransportEvent)>;

// ============================================================================
// TransportStatus
// ============================================================================

/// State shared between a transport handle and its I/O task.
#[derive(Debug)]
pub struct TransportStatus {
    state: Mutex<TransportState>,
    writable: AtomicBool,
}

impl TransportStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(TransportState::Opening),
            writable: AtomicBool::new(false),
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Whether a write batch may be handed over now.
    #[inline]
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }
}

// ============================================================================
// TransportCore
// ============================================================================

/// Behavior shared by every concrete transport.
///
/// Cloned into the transport's I/O task; all clones report into the same
/// status and event channel.
#[derive(Clone)]
pub struct TransportCore {
    id: TransportId,
    name: TransportName,
    options: Arc<TransportOptions>,
    query: Arc<RwLock<Vec<(String, String)>>>,
    status: Arc<TransportStatus>,
    events: EventSender,
}

impl fmt::Debug for TransportCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

impl TransportCore {
    /// Creates the shared core of a new transport.
    #[must_use]
    pub fn new(
        name: TransportName,
        options: Arc<TransportOptions>,
        query: Vec<(String, String)>,
        events: EventSender,
    ) -> Self {
        Self {
            id: TransportId::next(),
            name,
            options,
            query: Arc::new(RwLock::new(query)),
            status: Arc::new(TransportStatus::new()),
            events,
        }
    }

    /// Transport id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Transport name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> TransportName {
        self.name
    }

    /// Transport options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Shared status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> &Arc<TransportStatus> {
        &self.status
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.status.state()
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        *self.status.state.lock() = state;
    }

    pub(crate) fn set_writable(&self, writable: bool) {
        self.status.writable.store(writable, Ordering::SeqCst);
    }

    /// Session id carried in the query, once known.
    #[must_use]
    pub fn sid(&self) -> Option<String> {
        self.query
            .read()
            .iter()
            .find(|(k, _)| k == "sid")
            .map(|(_, v)| v.clone())
    }

    /// Sets or replaces the session id in the query.
    pub fn set_sid(&self, sid: &str) {
        let mut query = self.query.write();
        query.retain(|(k, _)| k != "sid");
        query.push(("sid".to_string(), sid.to_string()));
    }

    /// Builds the request URI for `scheme`.
    ///
    /// Adds a cache-busting timestamp when enabled, and `b64=1` when the
    /// transport cannot carry binary frames and no session exists yet.
    #[must_use]
    pub fn uri(&self, scheme: &str, timestamp_default: bool) -> String {
        let options = &self.options;
        let mut query = self.query.read().clone();

        if options.timestamp_requests.unwrap_or(timestamp_default) {
            query.push((options.timestamp_param.clone(), timestamp()));
        }
        let has_sid = query.iter().any(|(k, _)| k == "sid");
        if !options.supports_binary && (self.name != TransportName::Polling || !has_sid) {
            query.push(("b64".to_string(), "1".to_string()));
        }

        let host = if options.hostname.contains(':') {
            format!("[{}]", options.hostname)
        } else {
            options.hostname.clone()
        };
        let port = match options.port {
            Some(443) if options.secure => String::new(),
            Some(80) if !options.secure => String::new(),
            Some(port) => format!(":{port}"),
            None => String::new(),
        };

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &query {
            serializer.append_pair(k, v);
        }
        let encoded = serializer.finish();
        if encoded.is_empty() {
            format!("{scheme}://{host}{port}{}", options.path)
        } else {
            format!("{scheme}://{host}{port}{}?{encoded}", options.path)
        }
    }

    // ========================================================================
    // Event Reporting
    // ========================================================================

    fn emit(&self, event: TransportEvent) {
        if self.events.send((self.id, event)).is_err() {
            trace!(transport = %self.name, "Event receiver gone");
        }
    }

    /// Marks the transport open and writable.
    pub fn on_open(&self) {
        debug!(transport = %self.name, id = %self.id, "Transport open");
        self.set_state(TransportState::Open);
        self.set_writable(true);
        self.emit(TransportEvent::Open);
    }

    /// Reports an inbound packet.
    pub fn on_packet(&self, packet: Packet) {
        trace!(transport = %self.name, kind = %packet.kind, "Packet received");
        self.emit(TransportEvent::Packet(packet));
    }

    /// Decodes and reports one inbound frame.
    pub fn on_frame(&self, frame: Frame) {
        match decode_packet(frame) {
            Ok(packet) => self.on_packet(packet),
            Err(e) => self.on_error(TransportError::new("parse error").with_description(e)),
        }
    }

    /// Restores writability after a batch and reports the drain.
    pub fn on_drain(&self) {
        self.set_writable(true);
        self.emit(TransportEvent::Drain);
    }

    /// Completes a pause.
    pub fn on_paused(&self) {
        debug!(transport = %self.name, "Transport paused");
        self.set_state(TransportState::Paused);
        self.emit(TransportEvent::Paused);
    }

    /// Completes a pending pause if nothing is in flight.
    pub fn settle_pause(&self) {
        if self.state() == TransportState::Pausing && self.status.is_writable() {
            self.on_paused();
        }
    }

    /// Marks the transport closed and reports it.
    pub fn on_close(&self, description: Option<String>) {
        debug!(transport = %self.name, ?description, "Transport closed");
        self.set_state(TransportState::Closed);
        self.set_writable(false);
        self.emit(TransportEvent::Close { description });
    }

    /// Reports a failure.
    pub fn on_error(&self, error: TransportError) {
        warn!(transport = %self.name, error = %error, "Transport error");
        self.emit(TransportEvent::Error(error));
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A duplex channel to the server.
///
/// Implementors provide the four I/O hooks; the provided methods enforce the
/// state machine shared by all transports.
pub trait Transport: Send {
    /// Shared core.
    fn core(&self) -> &TransportCore;

    /// Starts connecting.
    fn do_open(&mut self);

    /// Hands a batch to the I/O task. Only called while open.
    fn write(&mut self, packets: Vec<Packet>);

    /// Starts pausing; must eventually call [`TransportCore::on_paused`].
    fn do_pause(&mut self) {
        self.core().settle_pause();
    }

    /// Tears down the channel.
    fn do_close(&mut self);

    /// Transport id.
    fn id(&self) -> TransportId {
        self.core().id()
    }

    /// Transport name.
    fn name(&self) -> TransportName {
        self.core().name()
    }

    /// Current state.
    fn state(&self) -> TransportState {
        self.core().state()
    }

    /// Whether a write batch may be handed over now.
    fn is_writable(&self) -> bool {
        self.core().status().is_writable()
    }

    /// Opens the channel.
    fn open(&mut self) {
        self.core().set_state(TransportState::Opening);
        self.do_open();
    }

    /// Sends a batch of packets.
    ///
    /// Dropped with a diagnostic when the transport is not open.
    fn send(&mut self, packets: Vec<Packet>) {
        if self.state() == TransportState::Open {
            self.core().set_writable(false);
            self.write(packets);
        } else {
            warn!(
                transport = %self.name(),
                state = ?self.state(),
                count = packets.len(),
                "Transport not open, discarding packets"
            );
        }
    }

    /// Pauses the transport once in-flight I/O has settled.
    fn pause(&mut self) {
        self.core().set_state(TransportState::Pausing);
        self.do_pause();
    }

    /// Closes the transport.
    fn close(&mut self) {
        if matches!(self.state(), TransportState::Opening | TransportState::Open) {
            self.do_close();
            self.core().on_close(None);
        }
    }
}

// ============================================================================
// TransportRegistry
// ============================================================================

/// Builds a transport around a prepared core.
pub type TransportConstructor = Arc<dyn Fn(TransportCore) -> Box<dyn Transport> + Send + Sync>;

/// Name → constructor table consulted when the engine creates transports.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    constructors: FxHashMap<TransportName, TransportConstructor>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("transports", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the standard table.
    ///
    /// WebTransport is only registered when a connector is supplied.
    #[must_use]
    pub fn standard(
        http: Arc<dyn HttpClient>,
        webtransport: Option<Arc<dyn WebTransportConnector>>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(TransportName::Polling, move |core| {
            Box::new(PollingTransport::new(core, Arc::clone(&http)))
        });
        registry.register(TransportName::WebSocket, |core| {
            Box::new(WebSocketTransport::new(core))
        });
        if let Some(connector) = webtransport {
            registry.register(TransportName::WebTransport, move |core| {
                Box::new(WebTransportTransport::new(core, Arc::clone(&connector)))
            });
        }
        registry
    }

    /// Registers or replaces a constructor.
    pub fn register<F>(&mut self, name: TransportName, constructor: F)
    where
        F: Fn(TransportCore) -> Box<dyn Transport> + Send + Sync + 'static,
    {
        self.constructors.insert(name, Arc::new(constructor));
    }

    /// Returns `true` if `name` can be constructed.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: TransportName) -> bool {
        self.constructors.contains_key(&name)
    }

    /// Constructs a transport, if registered.
    #[must_use]
    pub fn create(&self, core: TransportCore) -> Option<Box<dyn Transport>> {
        self.constructors.get(&core.name()).map(|ctor| ctor(core))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Alphabet for cache-busting timestamps.
const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

/// Last timestamp handed out and same-millisecond counter.
static LAST_STAMP: AtomicU64 = AtomicU64::new(0);
static STAMP_SEED: AtomicU64 = AtomicU64::new(0);

fn encode_base64_number(mut n: u64) -> String {
    let mut out = Vec::new();
    loop {
        out.push(ALPHABET[(n % 64) as usize]);
        n /= 64;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Returns a short, unique, time-based cache-busting string.
pub(crate) fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);
    let encoded = encode_base64_number(now);
    if LAST_STAMP.swap(now, Ordering::SeqCst) == now {
        let seed = STAMP_SEED.fetch_add(1, Ordering::SeqCst);
        format!("{encoded}.{}", encode_base64_number(seed))
    } else {
        STAMP_SEED.store(0, Ordering::SeqCst);
        encoded
    }
}

/// Awaits an optional boxed future; pends forever when absent.
pub(crate) async fn maybe<F>(fut: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match fut {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
