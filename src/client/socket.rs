//! Namespaced socket.
//!
//! A [`Socket`] is one namespace multiplexed over a [`Manager`]'s engine
//! connection. It performs the namespace handshake, delivers events to
//! listeners, and correlates acknowledgements with the callbacks that
//! asked for them.
//!
//! # Delivery
//!
//! | Situation | Emitted packet |
//! |-----------|----------------|
//! | connected | written at once |
//! | not connected | buffered until the namespace handshake completes |
//! | volatile and transport busy | dropped |
//! | `retries` configured | queued; one in flight at a time, resent until acknowledged |
//!
//! Events received before the handshake completes are buffered as well
//! and delivered right after `connect`.
//!
//! # Reserved Events
//!
//! | Event | Arguments |
//! |-------|-----------|
//! | `connect` | none |
//! | `connect_error` | `{ "message": ..., "data": ... }` |
//! | `disconnect` | reason, then description when known |

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::emitter::{Emitter, ListenerId};
use crate::error::{Error, Result};
use crate::identifiers::{AckId, AckIdGenerator, SocketKey};
use crate::protocol::packet::{Packet, PacketKind, is_reserved_event};
use crate::protocol::value::Value;

use super::manager::Manager;
use super::options::SocketOptions;

// ============================================================================
// Types
// ============================================================================

/// Acknowledgement callback.
pub type AckCallback = Box<dyn FnOnce(Result<Vec<Value>>) + Send>;

/// Event delivered to socket listeners.
#[derive(Clone)]
pub struct Message {
    /// Event arguments, without the event name.
    pub args: Vec<Value>,
    /// Present when the sender asked for an acknowledgement.
    pub ack: Option<AckSender>,
}

impl Message {
    fn new(args: Vec<Value>) -> Self {
        Self { args, ack: None }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("args", &self.args)
            .field("ack", &self.ack.as_ref().map(AckSender::id))
            .finish()
    }
}

/// Sends the acknowledgement for one received event.
///
/// Clones share a guard: only the first [`AckSender::send`] goes out.
#[derive(Clone)]
pub struct AckSender {
    socket: Weak<SocketInner>,
    id: AckId,
    sent: Arc<AtomicBool>,
}

impl AckSender {
    /// Acknowledgement id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> AckId {
        self.id
    }

    /// Sends the acknowledgement.
    ///
    /// Returns `false` if it was already sent or the socket is gone.
    pub fn send(&self, args: Vec<Value>) -> bool {
        if self.sent.swap(true, Ordering::SeqCst) {
            debug!(id = %self.id, "Acknowledgement already sent");
            return false;
        }
        let Some(inner) = self.socket.upgrade() else {
            return false;
        };
        let socket = Socket::from_inner(inner);
        trace!(nsp = %socket.nsp(), id = %self.id, "Sending acknowledgement");
        socket.packet(&Packet::ack(socket.nsp(), self.id, args))
    }
}

impl fmt::Debug for AckSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckSender")
            .field("id", &self.id)
            .field("sent", &self.sent.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// Internal State
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct EmitFlags {
    timeout: Option<Duration>,
    volatile: bool,
    from_queue: bool,
}

struct PendingAck {
    callback: AckCallback,
    timer: Option<AbortHandle>,
    /// Fails with [`Error::Disconnected`] instead of being dropped on close.
    with_error: bool,
}

struct QueuedPacket {
    id: u64,
    try_count: u32,
    pending: bool,
    event: String,
    args: Vec<Value>,
    flags: EmitFlags,
    ack: Option<AckCallback>,
}

#[derive(Default)]
struct SocketState {
    id: Option<String>,
    pid: Option<String>,
    last_offset: Option<String>,
    connected: bool,
    recovered: bool,
    active: bool,

    ack_ids: AckIdGenerator,
    acks: FxHashMap<AckId, PendingAck>,
    send_buffer: Vec<Packet>,
    receive_buffer: Vec<(String, Message)>,

    queue: VecDeque<QueuedPacket>,
    queue_seq: u64,
}

pub(crate) struct SocketInner {
    key: SocketKey,
    nsp: String,
    manager: Manager,
    options: SocketOptions,
    state: Mutex<SocketState>,
    emitter: Emitter<Message>,
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if self.state.get_mut().active {
            self.manager.detach(self.key);
        }
    }
}

// ============================================================================
// Socket
// ============================================================================

/// Namespaced socket.
///
/// Cheap to clone; clones share the same namespace session.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Socket")
            .field("nsp", &self.inner.nsp)
            .field("id", &state.id)
            .field("connected", &state.connected)
            .field("active", &state.active)
            .finish()
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Socket {}

impl Socket {
    pub(crate) fn new(manager: Manager, nsp: &str, options: SocketOptions) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                key: SocketKey::next(),
                nsp: nsp.to_string(),
                manager,
                options,
                state: Mutex::new(SocketState::default()),
                emitter: Emitter::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SocketInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SocketInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn key(&self) -> SocketKey {
        self.inner.key
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Namespace.
    #[inline]
    #[must_use]
    pub fn nsp(&self) -> &str {
        &self.inner.nsp
    }

    /// Session id assigned by the server for this namespace.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.inner.state.lock().id.clone()
    }

    /// Whether the namespace handshake completed.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Whether the last handshake resumed the previous session.
    #[must_use]
    pub fn recovered(&self) -> bool {
        self.inner.state.lock().recovered
    }

    /// Whether the socket is subscribed to its manager, and so reconnects
    /// with it.
    #[must_use]
    pub fn active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Manager the socket belongs to.
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &Manager {
        &self.inner.manager
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Subscribes to the manager and starts the namespace handshake,
    /// opening the manager if needed.
    pub fn connect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.connected {
                return;
            }
            state.active = true;
        }
        debug!(nsp = %self.inner.nsp, "Connecting socket");
        self.inner.manager.attach(self);
    }

    /// Leaves the namespace.
    ///
    /// The socket stays disconnected even if the manager reconnects;
    /// call [`Socket::connect`] to rejoin.
    pub fn disconnect(&self) {
        let connected = self.connected();
        if connected {
            debug!(nsp = %self.inner.nsp, "Disconnecting socket");
            self.packet(&Packet::new(PacketKind::Disconnect, &self.inner.nsp));
        }
        self.destroy();
        if connected {
            self.on_close("io client disconnect", None);
        }
    }

    fn destroy(&self) {
        self.inner.state.lock().active = false;
        self.inner.manager.detach(self.inner.key);
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Registers a listener for `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.inner.emitter.on(event, callback)
    }

    /// Registers a listener removed after its first call.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.inner.emitter.once(event, callback)
    }

    /// Removes a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.emitter.off(id)
    }

    /// Removes every listener for `event`.
    pub fn off_all(&self, event: &str) {
        self.inner.emitter.off_all(event);
    }

    // ========================================================================
    // Emitting
    // ========================================================================

    /// Emits `event`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedEvent`] for reserved event names.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        self.emit_with_flags(event, args, EmitFlags::default(), None)
    }

    /// Emits `event` as a `message`.
    ///
    /// # Errors
    ///
    /// Never fails; `message` is not reserved.
    pub fn send(&self, args: Vec<Value>) -> Result<()> {
        self.emit("message", args)
    }

    /// Emits `event` and calls `callback` with the acknowledgement.
    ///
    /// With a timeout configured, the callback receives
    /// [`Error::AckTimeout`] if no acknowledgement arrives in time, or
    /// [`Error::Disconnected`] if the socket disconnects first. Without
    /// one, an unacknowledged callback is dropped on disconnect.
    ///
    /// Must be called within a tokio runtime when a timeout applies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedEvent`] for reserved event names.
    pub fn emit_with_ack<F>(&self, event: &str, args: Vec<Value>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<Value>>) + Send + 'static,
    {
        self.emit_with_flags(event, args, EmitFlags::default(), Some(Box::new(callback)))
    }

    /// Emits `event` and waits for the acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`Error::ReservedEvent`] for reserved event names
    /// - [`Error::AckTimeout`] if a timeout applies and expires
    /// - [`Error::Disconnected`] if the socket disconnected first
    pub async fn emit_await(&self, event: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        self.flags(EmitFlags::default()).emit_await(event, args).await
    }

    /// Applies an acknowledgement timeout to the next emit.
    #[must_use]
    pub fn timeout(&self, timeout: Duration) -> EmitBuilder<'_> {
        self.flags(EmitFlags::default()).timeout(timeout)
    }

    /// Marks the next emit volatile: dropped if the transport is busy.
    #[must_use]
    pub fn volatile(&self) -> EmitBuilder<'_> {
        self.flags(EmitFlags::default()).volatile()
    }

    fn flags(&self, flags: EmitFlags) -> EmitBuilder<'_> {
        EmitBuilder {
            socket: self,
            flags,
        }
    }

    fn emit_with_flags(
        &self,
        event: &str,
        args: Vec<Value>,
        flags: EmitFlags,
        ack: Option<AckCallback>,
    ) -> Result<()> {
        if is_reserved_event(event) {
            return Err(Error::reserved_event(event));
        }

        if self.inner.options.retries.is_some() && !flags.from_queue && !flags.volatile {
            self.add_to_queue(event, args, flags, ack);
            return Ok(());
        }

        let mut packet = Packet::event(&self.inner.nsp, event, args);
        let transport_writable = self.inner.manager.is_transport_writable();
        let ping_expired = self.inner.manager.has_ping_expired();

        let mut state = self.inner.state.lock();
        if let Some(ack) = ack {
            let id = state.ack_ids.next_id();
            packet.id = Some(id);
            self.register_ack(&mut state, id, ack, flags.timeout);
        }

        if flags.volatile && !transport_writable {
            debug!(nsp = %self.inner.nsp, event, "Transport busy, volatile packet discarded");
        } else if state.connected && !ping_expired {
            drop(state);
            self.packet(&packet);
        } else {
            trace!(nsp = %self.inner.nsp, event, "Not connected, packet buffered");
            state.send_buffer.push(packet);
        }
        Ok(())
    }

    fn packet(&self, packet: &Packet) -> bool {
        self.inner.manager.write_packet(packet)
    }

    // ========================================================================
    // Acknowledgements
    // ========================================================================

    fn register_ack(
        &self,
        state: &mut SocketState,
        id: AckId,
        callback: AckCallback,
        timeout: Option<Duration>,
    ) {
        let Some(timeout) = timeout.or(self.inner.options.ack_timeout) else {
            state.acks.insert(
                id,
                PendingAck {
                    callback,
                    timer: None,
                    with_error: false,
                },
            );
            return;
        };

        let socket = self.downgrade();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = socket.upgrade() {
                Socket::from_inner(inner).on_ack_timeout(id, timeout);
            }
        });
        state.acks.insert(
            id,
            PendingAck {
                callback,
                timer: Some(timer.abort_handle()),
                with_error: true,
            },
        );
    }

    fn on_ack_timeout(&self, id: AckId, timeout: Duration) {
        let pending = {
            let mut state = self.inner.state.lock();
            let pending = state.acks.remove(&id);
            if pending.is_some() {
                state.send_buffer.retain(|packet| packet.id != Some(id));
            }
            pending
        };
        if let Some(pending) = pending {
            debug!(nsp = %self.inner.nsp, %id, "Acknowledgement timed out");
            (pending.callback)(Err(Error::ack_timeout(timeout.as_millis() as u64)));
        }
    }

    fn on_ack(&self, packet: Packet) {
        let Some(id) = packet.id else {
            warn!(nsp = %self.inner.nsp, "ACK without id");
            return;
        };
        let Some(pending) = self.inner.state.lock().acks.remove(&id) else {
            debug!(nsp = %self.inner.nsp, %id, "Unknown or expired acknowledgement");
            return;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        trace!(nsp = %self.inner.nsp, %id, "Acknowledgement received");
        (pending.callback)(Ok(into_args(packet.data)));
    }

    /// Drops acknowledgements whose packet already left; those that can
    /// fail are told the socket disconnected.
    fn clear_acks(&self) {
        let cleared: Vec<PendingAck> = {
            let mut state = self.inner.state.lock();
            let buffered: FxHashSet<AckId> =
                state.send_buffer.iter().filter_map(|p| p.id).collect();
            let mut ids: Vec<AckId> = state
                .acks
                .keys()
                .filter(|id| !buffered.contains(*id))
                .copied()
                .collect();
            ids.sort_unstable();
            ids.into_iter()
                .filter_map(|id| state.acks.remove(&id))
                .collect()
        };

        for pending in cleared {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            if pending.with_error {
                (pending.callback)(Err(Error::Disconnected));
            }
        }
    }

    // ========================================================================
    // Retry Queue
    // ========================================================================

    fn add_to_queue(
        &self,
        event: &str,
        args: Vec<Value>,
        flags: EmitFlags,
        ack: Option<AckCallback>,
    ) {
        {
            let mut state = self.inner.state.lock();
            let id = state.queue_seq;
            state.queue_seq += 1;
            state.queue.push_back(QueuedPacket {
                id,
                try_count: 0,
                pending: false,
                event: event.to_string(),
                args,
                flags: EmitFlags {
                    from_queue: true,
                    ..flags
                },
                ack,
            });
            trace!(nsp = %self.inner.nsp, id, queued = state.queue.len(), "Packet queued");
        }
        self.drain_queue(false);
    }

    /// Sends the head of the retry queue unless it is already in flight.
    fn drain_queue(&self, force: bool) {
        let (id, event, args, flags) = {
            let mut state = self.inner.state.lock();
            if !state.connected {
                return;
            }
            let Some(head) = state.queue.front_mut() else {
                return;
            };
            if head.pending && !force {
                return;
            }
            head.pending = true;
            head.try_count += 1;
            (head.id, head.event.clone(), head.args.clone(), head.flags)
        };

        let socket = self.downgrade();
        let ack: AckCallback = Box::new(move |result| {
            if let Some(inner) = socket.upgrade() {
                Socket::from_inner(inner).on_queue_ack(id, result);
            }
        });
        if let Err(e) = self.emit_with_flags(&event, args, flags, Some(ack)) {
            warn!(nsp = %self.inner.nsp, error = %e, "Queued packet rejected");
        }
    }

    fn on_queue_ack(&self, id: u64, result: Result<Vec<Value>>) {
        let retries = self.inner.options.retries.unwrap_or(0);
        let finished = {
            let mut state = self.inner.state.lock();
            let Some(head) = state.queue.front_mut() else {
                return;
            };
            if head.id != id {
                trace!(nsp = %self.inner.nsp, id, "Queued packet already settled");
                return;
            }
            head.pending = false;

            match &result {
                Err(e) if head.try_count <= retries => {
                    debug!(
                        nsp = %self.inner.nsp,
                        id,
                        tries = head.try_count,
                        error = %e,
                        "Retrying queued packet"
                    );
                    None
                }
                _ => state.queue.pop_front(),
            }
        };

        if let Some(packet) = finished
            && let Some(ack) = packet.ack
        {
            ack(result);
        }
        self.drain_queue(false);
    }

    // ========================================================================
    // Manager Callbacks
    // ========================================================================

    /// The manager's engine connection opened: start the handshake.
    pub(crate) fn on_open(&self) {
        let data = {
            let state = self.inner.state.lock();
            let auth = self.inner.options.auth.clone();
            match &state.pid {
                Some(pid) => {
                    let mut data = json!({ "pid": pid, "offset": state.last_offset });
                    if let (Some(map), Some(serde_json::Value::Object(auth))) =
                        (data.as_object_mut(), auth)
                    {
                        map.extend(auth);
                    }
                    Some(data)
                }
                None => auth,
            }
        };

        debug!(nsp = %self.inner.nsp, "Sending CONNECT");
        let mut packet = Packet::new(PacketKind::Connect, &self.inner.nsp);
        if let Some(data) = data {
            packet = packet.with_data(Value::from(data));
        }
        self.packet(&packet);
    }

    /// The manager reported an error.
    pub(crate) fn on_manager_error(&self, error: &Error) {
        if !self.connected() {
            self.emit_reserved("connect_error", vec![error_value(&error.to_string(), None)]);
        }
    }

    /// The manager's engine connection closed, or the socket left.
    pub(crate) fn on_close(&self, reason: &str, description: Option<String>) {
        {
            let mut state = self.inner.state.lock();
            state.connected = false;
            state.id = None;
        }
        info!(nsp = %self.inner.nsp, %reason, "Socket disconnected");

        let mut args = vec![Value::from(reason)];
        args.extend(description.map(Value::from));
        self.emit_reserved("disconnect", args);
        self.clear_acks();
    }

    /// A packet for this namespace was decoded.
    pub(crate) fn on_packet(&self, packet: Packet) {
        match packet.kind {
            PacketKind::Connect => {
                let data = packet.data.as_ref();
                let sid = data.and_then(|d| d.get("sid")).and_then(Value::as_str);
                match sid {
                    Some(sid) => {
                        let pid = data
                            .and_then(|d| d.get("pid"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        self.on_connect(sid.to_string(), pid);
                    }
                    None => {
                        warn!(nsp = %self.inner.nsp, "CONNECT without sid");
                        self.emit_reserved(
                            "connect_error",
                            vec![error_value(
                                "server does not speak a compatible Socket.IO version",
                                None,
                            )],
                        );
                    }
                }
            }

            PacketKind::Event | PacketKind::BinaryEvent => self.on_event(packet),
            PacketKind::Ack | PacketKind::BinaryAck => self.on_ack(packet),

            PacketKind::Disconnect => {
                debug!(nsp = %self.inner.nsp, "Server disconnected the namespace");
                self.destroy();
                self.on_close("io server disconnect", None);
            }

            PacketKind::ConnectError => {
                self.destroy();
                let data = packet.data.unwrap_or_default();
                let message = match &data {
                    Value::String(message) => message.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                };
                let extra = data.get("data").cloned();
                warn!(nsp = %self.inner.nsp, %message, "Namespace connection refused");
                self.emit_reserved("connect_error", vec![error_value(&message, extra)]);
            }
        }
    }

    fn on_connect(&self, sid: String, pid: Option<String>) {
        let (received, buffered) = {
            let mut state = self.inner.state.lock();
            state.recovered = pid.is_some() && state.pid == pid;
            state.pid = pid;
            state.id = Some(sid);
            state.connected = true;
            (
                std::mem::take(&mut state.receive_buffer),
                std::mem::take(&mut state.send_buffer),
            )
        };
        info!(nsp = %self.inner.nsp, recovered = self.recovered(), "Socket connected");

        for (event, message) in received {
            self.emit_event(&event, message);
        }
        for packet in &buffered {
            self.packet(packet);
        }
        self.drain_queue(true);
        self.emit_reserved("connect", Vec::new());
    }

    fn on_event(&self, packet: Packet) {
        let mut args = into_args(packet.data);
        if args.is_empty() {
            return;
        }
        let event = match args.remove(0) {
            Value::String(event) => event,
            Value::Number(n) => n.to_string(),
            other => {
                warn!(nsp = %self.inner.nsp, ?other, "Event without name");
                return;
            }
        };
        let message = Message {
            args,
            ack: packet.id.map(|id| AckSender {
                socket: self.downgrade(),
                id,
                sent: Arc::new(AtomicBool::new(false)),
            }),
        };

        let mut state = self.inner.state.lock();
        if state.connected {
            drop(state);
            self.emit_event(&event, message);
        } else {
            trace!(nsp = %self.inner.nsp, %event, "Event buffered until connected");
            state.receive_buffer.push((event, message));
        }
    }

    fn emit_event(&self, event: &str, message: Message) {
        let offset = match message.args.last() {
            Some(Value::String(offset)) => Some(offset.clone()),
            _ => None,
        };
        self.inner.emitter.emit(event, message);

        let mut state = self.inner.state.lock();
        if state.pid.is_some() && offset.is_some() {
            state.last_offset = offset;
        }
    }

    fn emit_reserved(&self, event: &str, args: Vec<Value>) {
        self.inner.emitter.emit(event, Message::new(args));
    }
}

// ============================================================================
// EmitBuilder
// ============================================================================

/// Emit with per-call flags.
///
/// Obtained from [`Socket::timeout`] or [`Socket::volatile`].
#[must_use]
pub struct EmitBuilder<'a> {
    socket: &'a Socket,
    flags: EmitFlags,
}

impl EmitBuilder<'_> {
    /// Sets the acknowledgement timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.flags.timeout = Some(timeout);
        self
    }

    /// Drops the packet if the transport is busy.
    pub fn volatile(mut self) -> Self {
        self.flags.volatile = true;
        self
    }

    /// Emits `event`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedEvent`] for reserved event names.
    pub fn emit(self, event: &str, args: Vec<Value>) -> Result<()> {
        self.socket.emit_with_flags(event, args, self.flags, None)
    }

    /// Emits `event` and calls `callback` with the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedEvent`] for reserved event names.
    pub fn emit_with_ack<F>(self, event: &str, args: Vec<Value>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<Value>>) + Send + 'static,
    {
        self.socket
            .emit_with_flags(event, args, self.flags, Some(Box::new(callback)))
    }

    /// Emits `event` and waits for the acknowledgement.
    ///
    /// # Errors
    ///
    /// See [`Socket::emit_await`].
    pub async fn emit_await(self, event: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        self.socket.emit_with_flags(
            event,
            args,
            self.flags,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )?;
        rx.await.map_err(|_| Error::Disconnected)?
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn into_args(data: Option<Value>) -> Vec<Value> {
    match data {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn error_value(message: &str, data: Option<Value>) -> Value {
    let mut entries = vec![("message".to_string(), Value::from(message))];
    if let Some(data) = data {
        entries.push(("data".to_string(), data));
    }
    Value::Object(entries)
}

// ============================================================================
// Tests
// ============================================================================
