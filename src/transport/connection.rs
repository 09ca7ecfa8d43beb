//! Engine connection and event loop.
//!
//! The engine connection owns the primary transport and drives the Engine
//! protocol on top of it: handshake, liveness, write buffering, and
//! transport upgrades.
//!
//! # Event Loop
//!
//! [`EngineConnection::open`] spawns a task that handles:
//!
//! - Transport events (tagged by transport id; stale ids are ignored)
//! - Commands from the handle (send, close)
//! - The liveness deadline and probe head-start timers
//!
//! Observers receive [`EngineEvent`]s on the channel returned by `open`.
//!
//! # Write Buffer
//!
//! Outbound packets queue in FIFO order. A flush hands the longest
//! admissible prefix to the primary transport and remembers its length;
//! the transport's drain splices exactly that many entries from the front.
//! Only one batch is ever in flight.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result, TransportError};
use crate::identifiers::TransportId;
use crate::protocol::engine::{PROTOCOL_VERSION, Packet, PacketData, PacketType};

use super::options::{EngineOptions, TransportOptions};
use super::upgrade::{
    Probe, ProbeAction, ProbeInput, ProbeState, WEBTRANSPORT_HEAD_START, probe_ping,
};
use super::{
    EventSender, Transport, TransportCore, TransportEvent, TransportName, TransportRegistry,
    TransportState, TransportStatus,
};

// ============================================================================
// Public Types
// ============================================================================

/// Engine connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Waiting for the handshake.
    Opening,
    /// Handshake done.
    Open,
    /// Close requested; waiting for the buffer to drain.
    Closing,
    /// Terminal.
    Closed,
}

/// Why an engine connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the local side.
    ForcedClose,
    /// No ping arrived in time.
    PingTimeout,
    /// The primary transport closed.
    TransportClose,
    /// The primary transport failed.
    TransportError,
}

impl CloseReason {
    /// Returns the reason as reported to observers.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ForcedClose => "forced close",
            Self::PingTimeout => "ping timeout",
            Self::TransportClose => "transport close",
            Self::TransportError => "transport error",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake sent by the server in the `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    /// Session id.
    pub sid: String,
    /// Transports the server can upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed ping in milliseconds.
    pub ping_timeout: u64,
    /// Largest polling payload the server accepts, 0 for unlimited.
    #[serde(default)]
    pub max_payload: u64,
}

/// Event emitted by an engine connection.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The handshake completed.
    Open(HandshakeData),
    /// A packet arrived on the primary transport.
    Packet(Packet),
    /// A `message` packet arrived.
    Message(PacketData),
    /// The server pinged.
    Ping,
    /// The write buffer is empty.
    Drain,
    /// A probe succeeded; the primary is pausing.
    Upgrading(TransportName),
    /// A probe became the primary transport.
    Upgrade(TransportName),
    /// A probe failed.
    UpgradeError(TransportError),
    /// The connection failed; a `Close` follows.
    Error(TransportError),
    /// The connection closed. Always the last event.
    Close {
        /// Why.
        reason: CloseReason,
        /// Underlying cause, if any.
        description: Option<String>,
    },
}

/// Receiving half of an engine connection's event stream.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

// ============================================================================
// EngineCommand
// ============================================================================

/// Internal commands for the event loop.
enum EngineCommand {
    /// Queue a message packet.
    Send(PacketData),
    /// Close gracefully.
    Close,
}

// ============================================================================
// Shared
// ============================================================================

/// State readable from the handle without a round trip.
#[derive(Debug)]
struct Shared {
    ready_state: Mutex<ReadyState>,
    id: Mutex<Option<String>>,
    transport: Mutex<Option<(TransportName, Arc<TransportStatus>)>>,
    ping_deadline: Mutex<Option<Instant>>,
    upgrading: Mutex<bool>,
}

// ============================================================================
// EngineConnection
// ============================================================================

/// Handle to an engine connection.
///
/// Cheap to clone. The connection closes gracefully when every handle is
/// dropped.
#[derive(Clone)]
pub struct EngineConnection {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    shared: Arc<Shared>,
}

impl fmt::Debug for EngineConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConnection")
            .field("id", &self.id())
            .field("ready_state", &self.ready_state())
            .field("transport", &self.transport_name())
            .finish()
    }
}

impl EngineConnection {
    /// Opens a connection to `url`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if `url` does not parse
    /// - [`Error::Config`] if the options are invalid
    pub fn open(url: &str, options: EngineOptions) -> Result<(Self, EngineEvents)> {
        let url = Url::parse(url)?;
        options.validate()?;

        let transport_options = Arc::new(options.resolve_transport_options(&url)?);
        let query = options.resolve_query(&url);
        let registry = options.resolve_registry();
        let transports: Vec<TransportName> = options
            .transports
            .iter()
            .copied()
            .filter(|name| registry.contains(*name))
            .collect();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            ready_state: Mutex::new(ReadyState::Opening),
            id: Mutex::new(None),
            transport: Mutex::new(None),
            ping_deadline: Mutex::new(None),
            upgrading: Mutex::new(false),
        });

        debug!(%url, ?transports, "Opening engine connection");

        let task = EngineTask {
            options,
            transport_options,
            query,
            registry,
            transports,
            transport_tx,
            event_tx,
            shared: Arc::clone(&shared),
            primary: None,
            probes: Vec::new(),
            ready_state: ReadyState::Opening,
            id: None,
            handshake: None,
            upgrades: Vec::new(),
            write_buffer: VecDeque::new(),
            prev_buffer_len: 0,
            upgrading: false,
            ping_deadline: None,
        };
        tokio::spawn(task.run(command_rx, transport_rx));

        Ok((Self { command_tx, shared }, event_rx))
    }

    /// Queues a message packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the event loop has stopped.
    pub fn send(&self, data: impl Into<PacketData>) -> Result<()> {
        self.command_tx
            .send(EngineCommand::Send(data.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the connection once buffered packets are flushed.
    pub fn close(&self) {
        let _ = self.command_tx.send(EngineCommand::Close);
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.shared.ready_state.lock()
    }

    /// Session id, once the handshake completed.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.shared.id.lock().clone()
    }

    /// Name of the primary transport.
    #[must_use]
    pub fn transport_name(&self) -> Option<TransportName> {
        self.shared.transport.lock().as_ref().map(|(name, _)| *name)
    }

    /// Whether the primary transport would accept a write right now.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.shared
            .transport
            .lock()
            .as_ref()
            .is_some_and(|(_, status)| status.is_writable())
    }

    /// Whether an upgrade is in progress.
    #[must_use]
    pub fn is_upgrading(&self) -> bool {
        *self.shared.upgrading.lock()
    }

    /// Whether the liveness deadline has passed, or was never armed.
    ///
    /// A host timer may fire late; this checks the deadline directly.
    #[must_use]
    pub fn has_ping_expired(&self) -> bool {
        self.shared
            .ping_deadline
            .lock()
            .is_none_or(|deadline| Instant::now() > deadline)
    }
}

// ============================================================================
// EngineTask
// ============================================================================

/// One upgrade candidate.
struct ProbeSlot {
    probe: Probe,
    transport: Box<dyn Transport>,
    start_at: Option<Instant>,
}

/// State owned by the event loop.
struct EngineTask {
    options: EngineOptions,
    transport_options: Arc<TransportOptions>,
    query: Vec<(String, String)>,
    registry: TransportRegistry,
    /// Remaining candidates for the initial transport.
    transports: Vec<TransportName>,
    transport_tx: EventSender,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    shared: Arc<Shared>,

    primary: Option<Box<dyn Transport>>,
    probes: Vec<ProbeSlot>,

    ready_state: ReadyState,
    id: Option<String>,
    handshake: Option<HandshakeData>,
    upgrades: Vec<TransportName>,
    write_buffer: VecDeque<Packet>,
    prev_buffer_len: usize,
    upgrading: bool,
    ping_deadline: Option<Instant>,
}

impl EngineTask {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut transport_rx: mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) {
        self.open_initial();
        let mut handles_dropped = false;

        while self.ready_state != ReadyState::Closed {
            let ping_deadline = self.ping_deadline;
            let probe_deadline = self.probes.iter().filter_map(|slot| slot.start_at).min();

            tokio::select! {
                Some((id, event)) = transport_rx.recv() => {
                    self.on_transport_event(id, event);
                }

                command = command_rx.recv(), if !handles_dropped => {
                    match command {
                        Some(EngineCommand::Send(data)) => {
                            self.send_packet(Packet { kind: PacketType::Message, data: Some(data) });
                        }
                        Some(EngineCommand::Close) => self.close(),
                        None => {
                            debug!("All engine handles dropped");
                            handles_dropped = true;
                            self.close();
                        }
                    }
                }

                _ = sleep_until(ping_deadline.unwrap_or_else(Instant::now)), if ping_deadline.is_some() => {
                    debug!("Ping deadline elapsed");
                    self.on_close(CloseReason::PingTimeout, None);
                }

                _ = sleep_until(probe_deadline.unwrap_or_else(Instant::now)), if probe_deadline.is_some() => {
                    self.on_probe_delays_elapsed();
                }
            }
        }

        trace!("Engine event loop terminated");
    }

    fn emit(&self, event: EngineEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("Engine event receiver gone");
        }
    }

    fn set_ready_state(&mut self, state: ReadyState) {
        self.ready_state = state;
        *self.shared.ready_state.lock() = state;
    }

    fn set_upgrading(&mut self, upgrading: bool) {
        self.upgrading = upgrading;
        *self.shared.upgrading.lock() = upgrading;
    }

    fn set_ping_deadline(&mut self, deadline: Option<Instant>) {
        self.ping_deadline = deadline;
        *self.shared.ping_deadline.lock() = deadline;
    }

    // ========================================================================
    // Transports
    // ========================================================================

    fn create_transport(&self, name: TransportName) -> Option<Box<dyn Transport>> {
        let mut query = self.query.clone();
        query.push(("EIO".to_string(), PROTOCOL_VERSION.to_string()));
        query.push(("transport".to_string(), name.as_str().to_string()));
        if let Some(id) = &self.id {
            query.push(("sid".to_string(), id.clone()));
        }
        let core = TransportCore::new(
            name,
            Arc::clone(&self.transport_options),
            query,
            self.transport_tx.clone(),
        );
        self.registry.create(core)
    }

    fn set_primary(&mut self, transport: Box<dyn Transport>) {
        debug!(transport = %transport.name(), id = %transport.id(), "Primary transport set");
        *self.shared.transport.lock() =
            Some((transport.name(), Arc::clone(transport.core().status())));
        self.primary = Some(transport);
    }

    /// Picks and opens the initial transport.
    fn open_initial(&mut self) {
        let name = if self.options.upgrade_remembered()
            && self.transports.contains(&TransportName::WebSocket)
        {
            Some(TransportName::WebSocket)
        } else {
            self.transports.first().copied()
        };

        let Some(mut transport) = name.and_then(|name| self.create_transport(name)) else {
            warn!("No transports available");
            let error = TransportError::new("No transports available");
            self.emit(EngineEvent::Error(error.clone()));
            self.on_close(CloseReason::TransportError, Some(error.to_string()));
            return;
        };

        self.set_ready_state(ReadyState::Opening);
        transport.open();
        self.set_primary(transport);
    }

    fn on_transport_event(&mut self, id: TransportId, event: TransportEvent) {
        if self.primary.as_ref().is_some_and(|t| t.id() == id) {
            self.on_primary_event(event);
        } else if self.probes.iter().any(|slot| slot.transport.id() == id) {
            let input = match event {
                TransportEvent::Open => ProbeInput::TransportOpen,
                TransportEvent::Packet(packet) => ProbeInput::Packet(packet),
                TransportEvent::Error(error) => ProbeInput::Error(error),
                TransportEvent::Close { .. } => ProbeInput::Close,
                TransportEvent::Drain | TransportEvent::Paused => return,
            };
            self.drive_probe(id, input);
        } else {
            trace!(%id, ?event, "Event from detached transport");
        }
    }

    fn on_primary_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => trace!("Primary transport open"),
            TransportEvent::Packet(packet) => self.on_packet(packet),
            TransportEvent::Drain => self.on_drain(),
            TransportEvent::Paused => {
                let pausing = self
                    .probes
                    .iter()
                    .find(|slot| slot.probe.state() == ProbeState::Pausing)
                    .map(|slot| slot.transport.id());
                if let Some(id) = pausing {
                    self.drive_probe(id, ProbeInput::PrimaryPaused);
                }
            }
            TransportEvent::Close { description } => {
                self.on_close(CloseReason::TransportClose, description);
            }
            TransportEvent::Error(error) => self.on_error(error),
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn on_packet(&mut self, packet: Packet) {
        if self.ready_state == ReadyState::Closed {
            debug!(kind = %packet.kind, "Packet received on closed connection");
            return;
        }

        trace!(kind = %packet.kind, "Engine packet");
        self.emit(EngineEvent::Packet(packet.clone()));

        match packet.kind {
            PacketType::Open => {
                let parsed = packet
                    .text()
                    .ok_or_else(|| Error::protocol("binary handshake"))
                    .and_then(|text| {
                        serde_json::from_str::<HandshakeData>(text).map_err(Error::from)
                    });
                match parsed {
                    Ok(handshake) => self.on_handshake(handshake),
                    Err(e) => self.on_error(TransportError::new("parse error").with_description(e)),
                }
            }

            PacketType::Ping => {
                self.reset_ping_deadline();
                self.send_packet(Packet::new(PacketType::Pong));
                self.emit(EngineEvent::Ping);
            }

            PacketType::Message => {
                if let Some(data) = packet.data {
                    self.emit(EngineEvent::Message(data));
                }
            }

            PacketType::Close => {
                self.on_close(CloseReason::TransportClose, Some("closed by server".to_string()));
            }

            PacketType::Pong | PacketType::Upgrade | PacketType::Noop => {}
        }
    }

    fn on_handshake(&mut self, handshake: HandshakeData) {
        debug!(
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            ping_timeout = handshake.ping_timeout,
            max_payload = handshake.max_payload,
            "Handshake completed"
        );

        self.id = Some(handshake.sid.clone());
        *self.shared.id.lock() = self.id.clone();
        if let Some(primary) = &self.primary {
            primary.core().set_sid(&handshake.sid);
        }
        let current = self.primary.as_ref().map(|t| t.name());
        self.upgrades = handshake
            .upgrades
            .iter()
            .filter_map(|name| name.parse::<TransportName>().ok())
            .filter(|name| Some(*name) != current)
            .filter(|name| self.options.transports.contains(name) && self.registry.contains(*name))
            .collect();
        self.handshake = Some(handshake.clone());

        self.on_open(handshake);
        if self.ready_state == ReadyState::Closed {
            return;
        }
        self.reset_ping_deadline();
    }

    fn on_open(&mut self, handshake: HandshakeData) {
        self.set_ready_state(ReadyState::Open);
        let on_websocket = self
            .primary
            .as_ref()
            .is_some_and(|t| t.name() == TransportName::WebSocket);
        self.options.set_upgrade_remembered(on_websocket);

        info!(sid = %handshake.sid, "Engine connection open");
        self.emit(EngineEvent::Open(handshake));
        self.flush();

        if self.ready_state == ReadyState::Open && self.options.upgrade {
            self.start_probes();
        }
    }

    fn reset_ping_deadline(&mut self) {
        if let Some(handshake) = &self.handshake {
            let wait = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
            self.set_ping_deadline(Some(Instant::now() + wait));
        }
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn send_packet(&mut self, packet: Packet) {
        if matches!(self.ready_state, ReadyState::Closing | ReadyState::Closed) {
            debug!(
                kind = %packet.kind,
                state = ?self.ready_state,
                "Dropping packet on closing connection"
            );
            return;
        }
        if self.ping_deadline.is_some_and(|deadline| Instant::now() > deadline) {
            debug!("Ping deadline passed before timer fired");
            self.on_close(CloseReason::PingTimeout, None);
            return;
        }

        self.write_buffer.push_back(packet);
        self.flush();
    }

    fn flush(&mut self) {
        if self.ready_state == ReadyState::Closed
            || self.upgrading
            || self.prev_buffer_len > 0
            || self.write_buffer.is_empty()
        {
            return;
        }
        let count = self.writable_prefix_len();
        let Some(primary) = self.primary.as_mut() else {
            return;
        };
        if !primary.is_writable() {
            return;
        }

        let batch: Vec<Packet> = self.write_buffer.iter().take(count).cloned().collect();
        trace!(count, buffered = self.write_buffer.len(), "Flushing");
        primary.send(batch);
        self.prev_buffer_len = count;
    }

    /// Length of the buffer prefix that fits in one polling payload.
    fn writable_prefix_len(&self) -> usize {
        let max_payload = self.handshake.as_ref().map_or(0, |h| h.max_payload) as usize;
        let on_polling = self
            .primary
            .as_ref()
            .is_some_and(|t| t.name() == TransportName::Polling);
        if max_payload == 0 || !on_polling || self.write_buffer.len() <= 1 {
            return self.write_buffer.len();
        }

        // type digit of the first packet
        let mut size = 1;
        for (i, packet) in self.write_buffer.iter().enumerate() {
            if let Some(data) = &packet.data {
                size += data.byte_len();
            }
            if i > 0 && size > max_payload {
                trace!(i, max_payload, "Payload limit reached");
                return i;
            }
            // separator and type digit of the next packet
            size += 2;
        }
        self.write_buffer.len()
    }

    fn on_drain(&mut self) {
        let count = self.prev_buffer_len.min(self.write_buffer.len());
        self.write_buffer.drain(..count);
        self.prev_buffer_len = 0;

        if self.write_buffer.is_empty() {
            self.emit(EngineEvent::Drain);
            self.try_finish_close();
        } else {
            self.flush();
        }
    }

    // ========================================================================
    // Upgrade
    // ========================================================================

    fn start_probes(&mut self) {
        let candidates = self.upgrades.clone();
        let favor_webtransport = candidates.contains(&TransportName::WebTransport);

        for name in candidates {
            let Some(transport) = self.create_transport(name) else {
                continue;
            };
            let delayed = favor_webtransport && name != TransportName::WebTransport;
            debug!(transport = %name, delayed, "Probing");

            let probe = Probe::new(name, delayed);
            let id = transport.id();
            let start = probe.start();
            self.probes.push(ProbeSlot {
                probe,
                transport,
                start_at: delayed.then(|| Instant::now() + WEBTRANSPORT_HEAD_START),
            });
            if let Some(action) = start {
                self.apply_probe_action(id, action);
            }
        }
    }

    fn on_probe_delays_elapsed(&mut self) {
        let now = Instant::now();
        let due: Vec<TransportId> = self
            .probes
            .iter_mut()
            .filter(|slot| slot.start_at.is_some_and(|at| at <= now))
            .map(|slot| {
                slot.start_at = None;
                slot.transport.id()
            })
            .collect();
        for id in due {
            self.drive_probe(id, ProbeInput::DelayElapsed);
        }
    }

    fn drive_probe(&mut self, id: TransportId, input: ProbeInput) {
        let Some(slot) = self.probes.iter_mut().find(|s| s.transport.id() == id) else {
            return;
        };
        if let Some(action) = slot.probe.transition(input) {
            self.apply_probe_action(id, action);
        }
    }

    fn take_probe(&mut self, id: TransportId) -> Option<ProbeSlot> {
        let index = self.probes.iter().position(|s| s.transport.id() == id)?;
        Some(self.probes.remove(index))
    }

    fn apply_probe_action(&mut self, id: TransportId, action: ProbeAction) {
        match action {
            ProbeAction::Open => {
                if let Some(slot) = self.probes.iter_mut().find(|s| s.transport.id() == id) {
                    slot.start_at = None;
                    slot.transport.open();
                }
            }

            ProbeAction::SendPing => {
                if let Some(slot) = self.probes.iter_mut().find(|s| s.transport.id() == id) {
                    slot.transport.send(vec![probe_ping()]);
                }
            }

            ProbeAction::PausePrimary => {
                let Some(name) = self
                    .probes
                    .iter()
                    .find(|s| s.transport.id() == id)
                    .map(|s| s.probe.name())
                else {
                    return;
                };
                self.set_upgrading(true);
                self.emit(EngineEvent::Upgrading(name));
                self.options
                    .set_upgrade_remembered(name == TransportName::WebSocket);

                let others: Vec<TransportId> = self
                    .probes
                    .iter()
                    .map(|s| s.transport.id())
                    .filter(|other| *other != id)
                    .collect();
                for other in others {
                    self.drive_probe(other, ProbeInput::OtherUpgrading(name));
                }

                if let Some(primary) = self.primary.as_mut() {
                    debug!(from = %primary.name(), to = %name, "Pausing primary for upgrade");
                    primary.pause();
                }
            }

            ProbeAction::Promote => {
                let Some(slot) = self.take_probe(id) else {
                    return;
                };
                if self.ready_state == ReadyState::Closed {
                    return;
                }
                let name = slot.probe.name();
                let previous = self.primary.take();
                self.set_primary(slot.transport);
                // Released without a close packet: the session lives on.
                drop(previous);

                info!(transport = %name, "Transport upgraded");
                self.emit(EngineEvent::Upgrade(name));
                self.set_upgrading(false);
                self.write_buffer.push_front(Packet::new(PacketType::Upgrade));
                self.flush();
            }

            ProbeAction::Abort(error) => {
                let Some(mut slot) = self.take_probe(id) else {
                    return;
                };
                slot.transport.close();
                self.emit(EngineEvent::UpgradeError(error));

                if self.upgrading && !self.any_probe_pausing() {
                    // The primary was already asked to pause and cannot resume.
                    self.set_upgrading(false);
                    let primary_paused = self.primary.as_ref().is_some_and(|t| {
                        matches!(t.state(), TransportState::Pausing | TransportState::Paused)
                    });
                    if primary_paused {
                        self.on_error(TransportError::new("upgrade failed"));
                        return;
                    }
                }
                self.try_finish_close();
            }

            ProbeAction::Freeze => {
                if let Some(mut slot) = self.take_probe(id) {
                    slot.transport.close();
                }
            }
        }
    }

    fn any_probe_pausing(&self) -> bool {
        self.probes
            .iter()
            .any(|s| s.probe.state() == ProbeState::Pausing)
    }

    // ========================================================================
    // Closing
    // ========================================================================

    fn close(&mut self) {
        if !matches!(self.ready_state, ReadyState::Opening | ReadyState::Open) {
            return;
        }
        debug!(buffered = self.write_buffer.len(), upgrading = self.upgrading, "Closing");
        self.set_ready_state(ReadyState::Closing);
        self.try_finish_close();
    }

    /// Completes a requested close once nothing is buffered or upgrading.
    fn try_finish_close(&mut self) {
        if self.ready_state != ReadyState::Closing {
            return;
        }
        if !self.write_buffer.is_empty() || self.upgrading {
            return;
        }
        self.on_close(CloseReason::ForcedClose, None);
    }

    fn on_error(&mut self, error: TransportError) {
        warn!(error = %error, "Engine connection error");
        self.options.set_upgrade_remembered(false);

        if self.options.try_all_transports
            && self.transports.len() > 1
            && self.ready_state == ReadyState::Opening
        {
            if let Some(mut failed) = self.primary.take() {
                let name = failed.name();
                failed.close();
                self.transports.retain(|t| *t != name);
                info!(failed = %name, next = ?self.transports.first(), "Trying next transport");
            }
            *self.shared.transport.lock() = None;
            self.open_initial();
            return;
        }

        self.emit(EngineEvent::Error(error.clone()));
        self.on_close(CloseReason::TransportError, Some(error.to_string()));
    }

    fn on_close(&mut self, reason: CloseReason, description: Option<String>) {
        if self.ready_state == ReadyState::Closed {
            return;
        }
        info!(%reason, ?description, "Engine connection closed");

        self.set_ready_state(ReadyState::Closed);
        self.set_upgrading(false);
        self.set_ping_deadline(None);
        if let Some(mut primary) = self.primary.take() {
            primary.close();
        }
        let probes: Vec<TransportId> = self.probes.iter().map(|s| s.transport.id()).collect();
        for id in probes {
            self.drive_probe(id, ProbeInput::EngineClosed);
        }

        self.id = None;
        *self.shared.id.lock() = None;
        self.write_buffer.clear();
        self.prev_buffer_len = 0;

        self.emit(EngineEvent::Close {
            reason,
            description,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
