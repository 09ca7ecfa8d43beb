//! Connection manager.
//!
//! A [`Manager`] owns at most one engine connection at a time and
//! multiplexes namespace [`Socket`]s over it. It reopens the connection
//! with exponential backoff after unexpected closes.
//!
//! # Event Loop
//!
//! [`Manager::new`] spawns a task that handles:
//!
//! - Commands from handles and sockets (open, attach, detach, close)
//! - Events from the current engine connection
//! - The connect timeout and the reconnection timer
//!
//! Socket callbacks for `open`, `packet`, `error` and `close` run on this
//! task, in the order the engine delivered the underlying events.
//!
//! # Events
//!
//! | Event | Payload |
//! |-------|---------|
//! | `open` | none |
//! | `close` | reason, description |
//! | `error` | the open or transport failure |
//! | `packet` | each decoded Socket.IO packet |
//! | `ping` | none |
//! | `reconnect_attempt` | attempt number |
//! | `reconnect` | attempts it took |
//! | `reconnect_error` | the failed attempt's error |
//! | `reconnect_failed` | none; attempts exhausted |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::emitter::{Emitter, ListenerId};
use crate::error::{Error, Result, TransportError};
use crate::identifiers::SocketKey;
use crate::protocol::engine::PacketData;
use crate::protocol::packet::{self, Decoder, Packet};
use crate::transport::{EngineConnection, EngineEvent, EngineEvents};

use super::backoff::{Backoff, ReconnectAction, ReconnectInput, ReconnectState, Reconnector};
use super::options::{ManagerOptions, SocketOptions};
use super::socket::{Socket, SocketInner};

// ============================================================================
// Public Types
// ============================================================================

/// Manager lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No engine connection.
    Closed,
    /// Engine connection waiting for its handshake.
    Opening,
    /// Engine connection open.
    Open,
}

/// Event emitted by a manager.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The engine connection opened.
    Open,
    /// The engine connection closed.
    Close {
        /// Why.
        reason: String,
        /// Underlying cause, if any.
        description: Option<String>,
    },
    /// Opening failed, or the open connection reported an error.
    Error(Arc<Error>),
    /// A Socket.IO packet was decoded.
    Packet(Packet),
    /// The server pinged.
    Ping,
    /// A reconnection attempt is starting.
    ReconnectAttempt {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A reconnection attempt succeeded.
    Reconnect {
        /// Number of attempts it took.
        attempt: u32,
    },
    /// A reconnection attempt failed.
    ReconnectError(Arc<Error>),
    /// Reconnection attempts are exhausted.
    ReconnectFailed,
}

impl ManagerEvent {
    /// Name listeners register under.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close { .. } => "close",
            Self::Error(_) => "error",
            Self::Packet(_) => "packet",
            Self::Ping => "ping",
            Self::ReconnectAttempt { .. } => "reconnect_attempt",
            Self::Reconnect { .. } => "reconnect",
            Self::ReconnectError(_) => "reconnect_error",
            Self::ReconnectFailed => "reconnect_failed",
        }
    }
}

// ============================================================================
// ManagerCommand
// ============================================================================

/// Internal commands for the event loop.
enum ManagerCommand {
    /// Open unless already open or opening; report the outcome if asked.
    Open(Option<oneshot::Sender<Result<()>>>),
    /// Subscribe a socket to manager events.
    Attach(Socket),
    /// Unsubscribe a socket; closes the manager once none is left.
    Detach(SocketKey),
    /// Close and stop reconnecting.
    Close,
}

// ============================================================================
// Shared
// ============================================================================

/// State readable from handles without a round trip.
struct Shared {
    ready_state: Mutex<ManagerState>,
    /// Current engine connection. Held while writing so the frames of one
    /// packet stay contiguous.
    engine: Mutex<Option<EngineConnection>>,
    reconnecting: AtomicBool,
    nsps: Mutex<FxHashMap<String, Weak<SocketInner>>>,
    emitter: Emitter<ManagerEvent>,
}

impl Shared {
    fn emit(&self, event: ManagerEvent) {
        self.emitter.emit(event.name(), event);
    }
}

// ============================================================================
// Manager
// ============================================================================

struct Inner {
    uri: String,
    options: ManagerOptions,
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    shared: Arc<Shared>,
}

/// Handle to a connection manager.
///
/// Cheap to clone. The manager shuts down once every handle, including
/// those held by its sockets, is dropped.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("uri", &self.inner.uri)
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Manager {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Manager {}

impl Manager {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// Creates a manager for `uri`.
    ///
    /// Must be called within a tokio runtime. Nothing is opened until a
    /// socket connects or [`Manager::open`] is called.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if `uri` does not parse
    /// - [`Error::Config`] if the options are invalid
    pub fn new(uri: &str, mut options: ManagerOptions) -> Result<Self> {
        Url::parse(uri)?;
        options.validate()?;
        // Remembered upgrades are scoped to one manager.
        options.engine.upgrade_memory = Arc::new(AtomicBool::new(false));

        let shared = Arc::new(Shared {
            ready_state: Mutex::new(ManagerState::Closed),
            engine: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            nsps: Mutex::new(FxHashMap::default()),
            emitter: Emitter::new(),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let backoff = Backoff::new(
            options.reconnection_delay,
            options.reconnection_delay_max,
            options.randomization_factor,
        );
        let task = ManagerTask {
            uri: uri.to_string(),
            reconnector: Reconnector::new(backoff, options.reconnection_attempts),
            options: options.clone(),
            shared: Arc::clone(&shared),
            engine: None,
            engine_events: None,
            decoder: Decoder::new(),
            ready_state: ManagerState::Closed,
            skip_reconnect: false,
            connect_deadline: None,
            reconnect_at: None,
            open_waiters: Vec::new(),
            attached: Vec::new(),
        };
        tokio::spawn(task.run(command_rx));

        debug!(%uri, "Manager created");
        Ok(Self {
            inner: Arc::new(Inner {
                uri: uri.to_string(),
                options,
                command_tx,
                shared,
            }),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// URI the manager connects to.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Options the manager was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn ready_state(&self) -> ManagerState {
        *self.inner.shared.ready_state.lock()
    }

    /// Whether a reconnection is scheduled or in progress.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.inner.shared.reconnecting.load(Ordering::SeqCst)
    }

    /// Current engine connection, if any.
    #[must_use]
    pub fn engine(&self) -> Option<EngineConnection> {
        self.inner.shared.engine.lock().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens the engine connection unless already open or opening.
    ///
    /// A failure is reported through the `error` event and, when enabled,
    /// starts reconnection.
    pub fn open(&self) {
        self.command(ManagerCommand::Open(None));
    }

    /// Opens the engine connection and waits for the outcome.
    ///
    /// Unlike [`Manager::open`], a failure is returned to the caller and
    /// does not start reconnection.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the handshake did not complete in time
    /// - [`Error::Transport`] if the transport failed
    /// - [`Error::ConnectionClosed`] if the manager closed meanwhile
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(ManagerCommand::Open(Some(tx)));
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Closes the engine connection and stops reconnecting.
    pub fn close(&self) {
        self.command(ManagerCommand::Close);
    }

    // ========================================================================
    // Sockets
    // ========================================================================

    /// Returns the socket for `nsp`, creating it on first use.
    ///
    /// `options` only apply when the socket is created. With auto-connect,
    /// a returned socket that is not active is connected.
    pub fn socket(&self, nsp: &str, options: SocketOptions) -> Socket {
        let mut nsps = self.inner.shared.nsps.lock();
        if let Some(inner) = nsps.get(nsp).and_then(Weak::upgrade) {
            drop(nsps);
            let socket = Socket::from_inner(inner);
            if self.inner.options.auto_connect && !socket.active() {
                socket.connect();
            }
            return socket;
        }

        let socket = Socket::new(self.clone(), nsp, options);
        nsps.insert(nsp.to_string(), socket.downgrade());
        drop(nsps);

        if self.inner.options.auto_connect {
            socket.connect();
        }
        socket
    }

    /// Whether a live socket exists for `nsp`.
    #[must_use]
    pub fn has_namespace(&self, nsp: &str) -> bool {
        self.inner
            .shared
            .nsps
            .lock()
            .get(nsp)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    pub(crate) fn attach(&self, socket: &Socket) {
        self.command(ManagerCommand::Attach(socket.clone()));
    }

    pub(crate) fn detach(&self, key: SocketKey) {
        self.command(ManagerCommand::Detach(key));
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for a manager event.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(ManagerEvent) + Send + Sync + 'static,
    {
        self.inner.shared.emitter.on(event, callback)
    }

    /// Registers a listener removed after its first call.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(ManagerEvent) + Send + Sync + 'static,
    {
        self.inner.shared.emitter.once(event, callback)
    }

    /// Removes a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.shared.emitter.off(id)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Encodes `packet` and queues its frames on the engine connection.
    ///
    /// Returns `false` if there is no engine connection.
    pub(crate) fn write_packet(&self, packet: &Packet) -> bool {
        let frames = packet::encode(packet);
        let engine = self.inner.shared.engine.lock();
        let Some(engine) = engine.as_ref() else {
            debug!(nsp = %packet.nsp, kind = %packet.kind, "No engine connection, packet dropped");
            return false;
        };
        trace!(nsp = %packet.nsp, kind = %packet.kind, frames = frames.len(), "Writing packet");
        frames.into_iter().all(|frame: PacketData| engine.send(frame).is_ok())
    }

    /// Whether the engine's transport would accept a write right now.
    pub(crate) fn is_transport_writable(&self) -> bool {
        self.inner
            .shared
            .engine
            .lock()
            .as_ref()
            .is_some_and(EngineConnection::is_writable)
    }

    /// Whether the engine's liveness deadline has passed.
    pub(crate) fn has_ping_expired(&self) -> bool {
        self.inner
            .shared
            .engine
            .lock()
            .as_ref()
            .is_none_or(EngineConnection::has_ping_expired)
    }

    fn command(&self, command: ManagerCommand) {
        if self.inner.command_tx.send(command).is_err() {
            warn!(uri = %self.inner.uri, "Manager task stopped");
        }
    }
}

// ============================================================================
// OpenError
// ============================================================================

/// Why an open attempt failed. Cloneable so every waiter gets an error.
#[derive(Debug, Clone)]
enum OpenError {
    Transport(TransportError),
    Timeout { timeout_ms: u64 },
    Closed(String),
    Setup(String),
}

impl OpenError {
    fn to_error(&self) -> Error {
        match self {
            Self::Transport(e) => Error::Transport(e.clone()),
            Self::Timeout { timeout_ms } => Error::connection_timeout(*timeout_ms),
            Self::Closed(reason) => Error::connection(reason.clone()),
            Self::Setup(message) => Error::connection(message.clone()),
        }
    }
}

// ============================================================================
// ManagerTask
// ============================================================================

/// State owned by the event loop.
struct ManagerTask {
    uri: String,
    options: ManagerOptions,
    shared: Arc<Shared>,

    engine: Option<EngineConnection>,
    engine_events: Option<EngineEvents>,
    decoder: Decoder,

    ready_state: ManagerState,
    reconnector: Reconnector,
    skip_reconnect: bool,
    connect_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    open_waiters: Vec<oneshot::Sender<Result<()>>>,
    /// Sockets subscribed to manager events, in attach order.
    attached: Vec<(SocketKey, Weak<SocketInner>)>,
}

impl ManagerTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ManagerCommand>) {
        loop {
            let connect_deadline = self.connect_deadline;
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(command) => self.on_command(command),
                        None => {
                            debug!(uri = %self.uri, "All manager handles dropped");
                            self.shutdown();
                            break;
                        }
                    }
                }

                event = next_engine_event(&mut self.engine_events), if self.engine_events.is_some() => {
                    match event {
                        Some(event) => self.on_engine_event(event),
                        None => self.engine_events = None,
                    }
                }

                _ = sleep_until(connect_deadline.unwrap_or_else(Instant::now)), if connect_deadline.is_some() => {
                    self.on_connect_timeout();
                }

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.drive_reconnect(ReconnectInput::TimerFired);
                }
            }
        }

        trace!("Manager event loop terminated");
    }

    fn on_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Open(waiter) => self.open(waiter),
            ManagerCommand::Attach(socket) => self.attach(socket),
            ManagerCommand::Detach(key) => self.detach(key),
            ManagerCommand::Close => self.close(),
        }
    }

    fn emit(&self, event: ManagerEvent) {
        self.shared.emit(event);
    }

    fn set_ready_state(&mut self, state: ManagerState) {
        self.ready_state = state;
        *self.shared.ready_state.lock() = state;
    }

    fn set_engine(&mut self, engine: Option<EngineConnection>) {
        *self.shared.engine.lock() = engine.clone();
        self.engine = engine;
    }

    /// Live attached sockets, pruning dropped ones.
    fn sockets(&mut self) -> Vec<Socket> {
        self.attached.retain(|(_, weak)| weak.strong_count() > 0);
        self.attached
            .iter()
            .filter_map(|(_, weak)| weak.upgrade().map(Socket::from_inner))
            .collect()
    }

    // ========================================================================
    // Opening
    // ========================================================================

    fn open(&mut self, waiter: Option<oneshot::Sender<Result<()>>>) {
        match self.ready_state {
            ManagerState::Open => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
                return;
            }
            ManagerState::Opening => {
                self.open_waiters.extend(waiter);
                return;
            }
            ManagerState::Closed => {}
        }

        self.open_waiters.extend(waiter);
        self.skip_reconnect = false;
        debug!(uri = %self.uri, "Opening engine connection");

        match EngineConnection::open(&self.uri, self.options.engine.clone()) {
            Ok((engine, events)) => {
                self.set_engine(Some(engine));
                self.engine_events = Some(events);
                self.set_ready_state(ManagerState::Opening);
                self.connect_deadline = self.options.timeout.map(|t| Instant::now() + t);
            }
            Err(e) => self.on_open_failed(OpenError::Setup(e.to_string())),
        }
    }

    fn on_engine_open(&mut self) {
        self.connect_deadline = None;
        self.decoder.reset();
        self.set_ready_state(ManagerState::Open);
        info!(uri = %self.uri, "Manager open");

        self.emit(ManagerEvent::Open);
        for socket in self.sockets() {
            socket.on_open();
        }
        for waiter in self.open_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        if self.reconnector.state() == ReconnectState::Attempting {
            self.drive_reconnect(ReconnectInput::AttemptSucceeded);
        }
    }

    fn on_open_failed(&mut self, error: OpenError) {
        self.cleanup();
        if let Some(engine) = self.engine.take() {
            engine.close();
        }
        self.set_engine(None);
        self.set_ready_state(ManagerState::Closed);

        let reported = Arc::new(error.to_error());
        warn!(uri = %self.uri, error = %reported, "Open failed");
        self.emit(ManagerEvent::Error(Arc::clone(&reported)));
        for socket in self.sockets() {
            socket.on_manager_error(&reported);
        }

        let waiters: Vec<_> = self.open_waiters.drain(..).collect();
        let had_waiters = !waiters.is_empty();
        for waiter in waiters {
            let _ = waiter.send(Err(error.to_error()));
        }

        if self.reconnector.state() == ReconnectState::Attempting {
            self.drive_reconnect(ReconnectInput::AttemptFailed);
            self.emit(ManagerEvent::ReconnectError(reported));
        } else if !had_waiters {
            self.maybe_reconnect_on_open();
        }
    }

    fn on_connect_timeout(&mut self) {
        let timeout_ms = self
            .options
            .timeout
            .map_or(0, |t| t.as_millis() as u64);
        debug!(timeout_ms, "Connect timeout");
        self.connect_deadline = None;
        self.on_open_failed(OpenError::Timeout { timeout_ms });
    }

    // ========================================================================
    // Engine Events
    // ========================================================================

    fn on_engine_event(&mut self, event: EngineEvent) {
        match (self.ready_state, event) {
            (ManagerState::Opening, EngineEvent::Open(_)) => self.on_engine_open(),
            (ManagerState::Opening, EngineEvent::Error(error)) => {
                self.on_open_failed(OpenError::Transport(error));
            }
            (ManagerState::Opening, EngineEvent::Close { reason, description }) => {
                let reason = match description {
                    Some(description) => format!("{reason}: {description}"),
                    None => reason.to_string(),
                };
                self.on_open_failed(OpenError::Closed(reason));
            }

            (ManagerState::Open, EngineEvent::Message(data)) => self.on_data(data),
            (ManagerState::Open, EngineEvent::Ping) => self.emit(ManagerEvent::Ping),
            (ManagerState::Open, EngineEvent::Error(error)) => {
                let error = Arc::new(Error::Transport(error));
                warn!(error = %error, "Engine error");
                self.emit(ManagerEvent::Error(Arc::clone(&error)));
                for socket in self.sockets() {
                    socket.on_manager_error(&error);
                }
            }
            (ManagerState::Open, EngineEvent::Close { reason, description }) => {
                self.on_close(reason.as_str(), description);
            }

            (state, event) => trace!(?state, ?event, "Engine event ignored"),
        }
    }

    fn on_data(&mut self, data: PacketData) {
        match self.decoder.add(data) {
            Ok(Some(packet)) => self.on_decoded(packet),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Undecodable packet");
                self.on_close("parse error", Some(e.to_string()));
            }
        }
    }

    fn on_decoded(&mut self, packet: Packet) {
        trace!(nsp = %packet.nsp, kind = %packet.kind, "Packet decoded");
        if self.shared.emitter.listener_count("packet") > 0 {
            self.emit(ManagerEvent::Packet(packet.clone()));
        }
        for socket in self.sockets() {
            if socket.nsp() == packet.nsp {
                socket.on_packet(packet.clone());
            }
        }
    }

    // ========================================================================
    // Sockets
    // ========================================================================

    fn attach(&mut self, socket: Socket) {
        let key = socket.key();
        if !self.attached.iter().any(|(k, _)| *k == key) {
            debug!(nsp = %socket.nsp(), %key, "Socket attached");
            self.attached.push((key, socket.downgrade()));
        }
        if !self.reconnector.is_reconnecting() {
            self.open(None);
        }
        if self.ready_state == ManagerState::Open {
            socket.on_open();
        }
    }

    fn detach(&mut self, key: SocketKey) {
        self.attached.retain(|(k, _)| *k != key);
        debug!(%key, remaining = self.attached.len(), "Socket detached");
        if self.sockets().is_empty() {
            self.close();
        }
    }

    // ========================================================================
    // Closing
    // ========================================================================

    fn cleanup(&mut self) {
        self.connect_deadline = None;
        self.engine_events = None;
        self.decoder.reset();
    }

    fn on_close(&mut self, reason: &str, description: Option<String>) {
        info!(uri = %self.uri, %reason, ?description, "Manager closed");
        self.cleanup();
        if let Some(engine) = self.engine.take() {
            engine.close();
        }
        self.set_engine(None);
        self.reconnector.reset_backoff();
        self.set_ready_state(ManagerState::Closed);
        for waiter in self.open_waiters.drain(..) {
            let _ = waiter.send(Err(Error::ConnectionClosed));
        }

        self.emit(ManagerEvent::Close {
            reason: reason.to_string(),
            description: description.clone(),
        });
        for socket in self.sockets() {
            socket.on_close(reason, description.clone());
        }

        if self.options.reconnection && !self.skip_reconnect {
            self.reconnect();
        }
    }

    fn close(&mut self) {
        debug!(uri = %self.uri, state = ?self.ready_state, "Closing manager");
        self.skip_reconnect = true;
        self.reconnect_at = None;
        self.drive_reconnect(ReconnectInput::Cancel);
        if self.ready_state != ManagerState::Closed || self.engine.is_some() {
            self.on_close("forced close", None);
        }
    }

    fn shutdown(&mut self) {
        self.skip_reconnect = true;
        self.reconnect_at = None;
        self.cleanup();
        if let Some(engine) = self.engine.take() {
            engine.close();
        }
        self.set_engine(None);
        self.set_ready_state(ManagerState::Closed);
    }

    // ========================================================================
    // Reconnection
    // ========================================================================

    fn maybe_reconnect_on_open(&mut self) {
        if !self.reconnector.is_reconnecting()
            && self.options.reconnection
            && self.reconnector.attempts() == 0
        {
            self.reconnect();
        }
    }

    fn reconnect(&mut self) {
        if self.skip_reconnect || self.reconnector.is_reconnecting() {
            return;
        }
        self.drive_reconnect(ReconnectInput::Disconnected);
    }

    fn drive_reconnect(&mut self, input: ReconnectInput) {
        let action = self.reconnector.transition(input);
        self.shared
            .reconnecting
            .store(self.reconnector.is_reconnecting(), Ordering::SeqCst);

        match action {
            Some(ReconnectAction::Schedule { delay }) => {
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Some(ReconnectAction::Attempt { attempt }) => {
                if self.skip_reconnect {
                    return;
                }
                info!(uri = %self.uri, attempt, "Reconnecting");
                self.emit(ManagerEvent::ReconnectAttempt { attempt });
                if self.skip_reconnect {
                    return;
                }
                self.open(None);
            }
            Some(ReconnectAction::GiveUp) => {
                warn!(uri = %self.uri, "Reconnection failed");
                self.emit(ManagerEvent::ReconnectFailed);
            }
            Some(ReconnectAction::Reconnected { attempt }) => {
                info!(uri = %self.uri, attempt, "Reconnected");
                self.emit(ManagerEvent::Reconnect { attempt });
            }
            None => {}
        }
    }
}

async fn next_engine_event(events: &mut Option<EngineEvents>) -> Option<EngineEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::transport::mock::MockServer;

    const URL: &str = "http://localhost:3000";

    fn options(server: &MockServer) -> ManagerOptions {
        ManagerOptions::new()
            .with_engine(
                crate::transport::EngineOptions::new()
                    .with_path("/socket.io")
                    .with_registry(server.registry()),
            )
            .with_reconnection_delay(Duration::from_millis(100))
            .with_reconnection_delay_max(Duration::from_millis(1000))
            .with_randomization_factor(0.0)
    }

    /// Forwards the named events to a channel.
    fn record(manager: &Manager, names: &[&str]) -> mpsc::UnboundedReceiver<ManagerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for name in names {
            let tx = tx.clone();
            manager.on(name, move |event| {
                let _ = tx.send(event);
            });
        }
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ManagerEvent>) -> ManagerEvent {
        timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("event in time")
            .expect("listener alive")
    }

    #[tokio::test]
    async fn test_connect_opens_engine() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server)).unwrap();
        let mut events = record(&manager, &["open"]);

        manager.connect().await.unwrap();
        assert!(matches!(next(&mut events).await, ManagerEvent::Open));
        assert_eq!(manager.ready_state(), ManagerState::Open);
        assert!(manager.engine().is_some());

        // Already open: resolves at once.
        manager.connect().await.unwrap();
        assert_eq!(server.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let server = MockServer::new();
        server.hold_handshake(true);
        let manager = Manager::new(
            URL,
            options(&server).with_timeout(Duration::from_millis(100)),
        )
        .unwrap();
        let mut events = record(&manager, &["error", "reconnect_attempt"]);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 100 }));
        assert!(matches!(next(&mut events).await, ManagerEvent::Error(_)));
        assert_eq!(manager.ready_state(), ManagerState::Closed);

        // A caller waiting on the outcome handles the failure itself.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());
        assert!(!manager.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_transport_close() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server)).unwrap();
        let mut events = record(&manager, &["close", "reconnect_attempt", "reconnect"]);
        manager.connect().await.unwrap();

        server.current().expect("link").close();

        match next(&mut events).await {
            ManagerEvent::Close { reason, .. } => assert_eq!(reason, "transport close"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next(&mut events).await,
            ManagerEvent::ReconnectAttempt { attempt: 1 }
        ));
        assert!(matches!(
            next(&mut events).await,
            ManagerEvent::Reconnect { attempt: 1 }
        ));
        assert_eq!(manager.ready_state(), ManagerState::Open);
        assert!(!manager.is_reconnecting());
        assert_eq!(server.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_failed_fires_once() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server).with_reconnection_attempts(2)).unwrap();
        let mut events = record(
            &manager,
            &["reconnect_attempt", "reconnect_error", "reconnect_failed"],
        );
        manager.connect().await.unwrap();

        server.refuse_opens(usize::MAX);
        let started = Instant::now();
        server.current().expect("link").close();

        let mut names = Vec::new();
        for _ in 0..5 {
            names.push(next(&mut events).await.name());
        }
        assert_eq!(
            names,
            vec![
                "reconnect_attempt",
                "reconnect_error",
                "reconnect_attempt",
                "reconnect_failed",
                "reconnect_error",
            ]
        );
        // 100ms then 200ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(300));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());
        assert!(!manager.is_reconnecting());
        assert_eq!(manager.ready_state(), ManagerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_reconnection() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server)).unwrap();
        let mut events = record(&manager, &["close", "reconnect_attempt"]);
        manager.connect().await.unwrap();

        server.current().expect("link").close();
        assert!(matches!(next(&mut events).await, ManagerEvent::Close { .. }));
        assert!(manager.is_reconnecting());

        manager.close();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());
        assert!(!manager.is_reconnecting());
        assert_eq!(server.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_closes_and_reconnects() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server)).unwrap();
        let mut events = record(&manager, &["close", "reconnect"]);
        manager.connect().await.unwrap();

        server.current().expect("link").push_message("9garbage");

        match next(&mut events).await {
            ManagerEvent::Close { reason, description } => {
                assert_eq!(reason, "parse error");
                assert!(description.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(next(&mut events).await, ManagerEvent::Reconnect { .. }));
    }

    #[tokio::test]
    async fn test_ping_and_packet_events() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server)).unwrap();
        let mut events = record(&manager, &["ping", "packet"]);
        manager.connect().await.unwrap();

        let link = server.current().expect("link");
        link.push(crate::protocol::engine::Packet::new(
            crate::protocol::engine::PacketType::Ping,
        ));
        link.push_message(r#"2["hello"]"#);

        assert!(matches!(next(&mut events).await, ManagerEvent::Ping));
        match next(&mut events).await {
            ManagerEvent::Packet(packet) => {
                assert_eq!(packet.kind, crate::protocol::PacketKind::Event);
                assert_eq!(packet.nsp, "/");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_socket_is_memoized_per_namespace() {
        let server = MockServer::new();
        let manager = Manager::new(URL, options(&server).with_auto_connect(false)).unwrap();

        let a = manager.socket("/a", SocketOptions::new());
        let again = manager.socket("/a", SocketOptions::new());
        let b = manager.socket("/b", SocketOptions::new());
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert!(manager.has_namespace("/a"));

        drop((a, again));
        assert!(!manager.has_namespace("/a"));
    }

    #[test]
    fn test_invalid_uri_is_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert!(matches!(
                Manager::new("not a uri", ManagerOptions::new()),
                Err(Error::InvalidUrl(_))
            ));
        });
    }
}
