//! In-memory transport for tests.
//!
//! A [`MockServer`] plays the remote end for every transport it constructs:
//! it answers the initial connection with a handshake, echoes probe pings
//! and hands every `message` packet to an optional script.
//! [`MockServer::answer_socket_io`] installs a script playing a small
//! Socket.IO server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::json;

use crate::error::TransportError;
use crate::protocol::engine::{Packet, PacketData, PacketType};
use crate::protocol::packet::{self as sio, Decoder, PacketKind};
use crate::protocol::value::Value;

use super::upgrade::{probe_ping, probe_pong};
use super::{Transport, TransportCore, TransportName, TransportRegistry, TransportState};

/// Reacts to a `message` packet written by the client.
pub(crate) type Script = Arc<dyn Fn(&MockLink, &Packet) + Send + Sync>;

// ============================================================================
// MockLink
// ============================================================================

/// Server side of one mock transport.
#[derive(Clone, Debug)]
pub(crate) struct MockLink {
    core: TransportCore,
}

impl MockLink {
    pub(crate) fn name(&self) -> TransportName {
        self.core.name()
    }

    pub(crate) fn state(&self) -> TransportState {
        self.core.state()
    }

    /// Delivers a packet to the client.
    pub(crate) fn push(&self, packet: Packet) {
        self.core.on_packet(packet);
    }

    /// Delivers a text `message` packet to the client.
    pub(crate) fn push_message(&self, text: impl Into<String>) {
        self.push(Packet::message(text.into()));
    }

    /// Completes an outstanding write.
    pub(crate) fn drain(&self) {
        self.core.on_drain();
        self.core.settle_pause();
    }

    /// Closes the link from the server side.
    pub(crate) fn close(&self) {
        self.core.on_close(Some("mock server closed".to_string()));
    }

    /// Fails the link.
    pub(crate) fn fail(&self, reason: &str) {
        self.core.on_error(TransportError::new(reason));
    }
}

// ============================================================================
// MockServer
// ============================================================================

#[derive(Default)]
struct ServerState {
    handshake: Mutex<String>,
    sent: Mutex<Vec<(TransportName, Packet)>>,
    links: Mutex<Vec<MockLink>>,
    script: Mutex<Option<Script>>,
    manual_drain: AtomicBool,
    refuse_opens: AtomicUsize,
    opens: AtomicUsize,
    answer_probes: AtomicBool,
    hold_handshake: AtomicBool,
}

/// Scripted remote end shared by all mock transports it constructs.
#[derive(Clone)]
pub(crate) struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    /// Creates a server that offers no upgrades.
    pub(crate) fn new() -> Self {
        let server = Self {
            state: Arc::new(ServerState::default()),
        };
        server.set_handshake(&[], 25_000, 20_000, 1_000_000);
        server.state.answer_probes.store(true, Ordering::SeqCst);
        server
    }

    pub(crate) fn set_handshake(
        &self,
        upgrades: &[&str],
        ping_interval: u64,
        ping_timeout: u64,
        max_payload: u64,
    ) {
        *self.state.handshake.lock() = serde_json::json!({
            "sid": "mock-sid",
            "upgrades": upgrades,
            "pingInterval": ping_interval,
            "pingTimeout": ping_timeout,
            "maxPayload": max_payload,
        })
        .to_string();
    }

    /// Handles `message` packets with `script`.
    pub(crate) fn set_script(&self, script: impl Fn(&MockLink, &Packet) + Send + Sync + 'static) {
        *self.state.script.lock() = Some(Arc::new(script));
    }

    /// Holds writes until [`MockLink::drain`] is called.
    pub(crate) fn set_manual_drain(&self, manual: bool) {
        self.state.manual_drain.store(manual, Ordering::SeqCst);
    }

    /// Fails the next `count` opens.
    pub(crate) fn refuse_opens(&self, count: usize) {
        self.state.refuse_opens.store(count, Ordering::SeqCst);
    }

    /// Stops echoing probe pings.
    pub(crate) fn ignore_probes(&self) {
        self.state.answer_probes.store(false, Ordering::SeqCst);
    }

    /// Opens transports without ever sending the handshake.
    pub(crate) fn hold_handshake(&self, hold: bool) {
        self.state.hold_handshake.store(hold, Ordering::SeqCst);
    }

    /// Number of transports opened so far, refused ones included.
    pub(crate) fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Every packet written by the client, with the transport that carried it.
    pub(crate) fn sent(&self) -> Vec<(TransportName, Packet)> {
        self.state.sent.lock().clone()
    }

    /// Text of every `message` packet written by the client.
    pub(crate) fn sent_messages(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(_, p)| p.kind == PacketType::Message)
            .filter_map(|(_, p)| p.text().map(str::to_string))
            .collect()
    }

    /// Every Socket.IO packet written by the client, attachments excluded.
    pub(crate) fn sent_socket_io(&self) -> Vec<sio::Packet> {
        self.sent_messages()
            .into_iter()
            .filter_map(|text| Decoder::new().add(PacketData::Text(text)).ok().flatten())
            .collect()
    }

    /// Most recent open link.
    pub(crate) fn current(&self) -> Option<MockLink> {
        self.state
            .links
            .lock()
            .iter()
            .rev()
            .find(|link| link.state() == TransportState::Open)
            .cloned()
    }

    /// Plays a Socket.IO server on top of the Engine session.
    ///
    /// - CONNECT to `/forbidden` is refused, any other namespace accepted
    ///   with a fresh sid and a per-namespace pid
    /// - `ack` events are acknowledged with their arguments
    /// - `echo` events are sent back as `echo`
    /// - `kick` events disconnect the namespace
    /// - anything else is ignored
    pub(crate) fn answer_socket_io(&self) {
        let sessions = Arc::new(AtomicUsize::new(0));
        self.set_script(move |link, packet| {
            let Some(text) = packet.text() else {
                return;
            };
            let Ok(Some(request)) = Decoder::new().add(PacketData::from(text)) else {
                return;
            };
            let nsp = request.nsp.clone();

            let reply = match request.kind {
                PacketKind::Connect if nsp == "/forbidden" => Some(
                    sio::Packet::new(PacketKind::ConnectError, &nsp)
                        .with_data(Value::from(json!({ "message": "not authorized" }))),
                ),
                PacketKind::Connect => {
                    let n = sessions.fetch_add(1, Ordering::SeqCst) + 1;
                    Some(sio::Packet::new(PacketKind::Connect, &nsp).with_data(Value::from(
                        json!({ "sid": format!("{nsp}#{n}"), "pid": format!("pid{nsp}") }),
                    )))
                }
                PacketKind::Event => {
                    let mut args = request
                        .data
                        .as_ref()
                        .and_then(Value::as_array)
                        .map(<[Value]>::to_vec)
                        .unwrap_or_default();
                    let event = if args.is_empty() {
                        String::new()
                    } else {
                        args.remove(0).as_str().unwrap_or_default().to_string()
                    };
                    match event.as_str() {
                        "ack" => request.id.map(|id| sio::Packet::ack(&nsp, id, args)),
                        "echo" => Some(sio::Packet::event(&nsp, "echo", args)),
                        "kick" => Some(sio::Packet::new(PacketKind::Disconnect, &nsp)),
                        _ => None,
                    }
                }
                _ => None,
            };

            if let Some(reply) = reply {
                for data in sio::encode(&reply) {
                    link.push(Packet::message(data));
                }
            }
        });
    }

    /// Table constructing mock transports for every transport name.
    pub(crate) fn registry(&self) -> TransportRegistry {
        let mut registry = TransportRegistry::new();
        for name in [
            TransportName::Polling,
            TransportName::WebSocket,
            TransportName::WebTransport,
        ] {
            let server = self.clone();
            registry.register(name, move |core| {
                Box::new(MockTransport {
                    core,
                    server: Some(server.clone()),
                })
            });
        }
        registry
    }
}

// ============================================================================
// MockTransport
// ============================================================================

/// Transport whose remote end is a [`MockServer`].
pub(crate) struct MockTransport {
    core: TransportCore,
    server: Option<MockServer>,
}

impl MockTransport {
    /// A transport with no remote end; it never opens.
    pub(crate) fn detached(core: TransportCore) -> Self {
        Self { core, server: None }
    }

    fn link(&self) -> MockLink {
        MockLink {
            core: self.core.clone(),
        }
    }
}

impl Transport for MockTransport {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn do_open(&mut self) {
        let Some(server) = &self.server else {
            return;
        };
        let state = &server.state;
        state.opens.fetch_add(1, Ordering::SeqCst);

        let refused = state
            .refuse_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            self.core.on_error(TransportError::new("mock refused"));
            return;
        }

        state.links.lock().push(self.link());
        self.core.on_open();
        if self.core.sid().is_none() && !state.hold_handshake.load(Ordering::SeqCst) {
            let handshake = state.handshake.lock().clone();
            self.core
                .on_packet(Packet::with_data(PacketType::Open, handshake));
        }
    }

    fn write(&mut self, packets: Vec<Packet>) {
        let Some(server) = &self.server else {
            return;
        };
        let state = &server.state;
        let link = self.link();
        let script = state.script.lock().clone();

        for packet in packets {
            state.sent.lock().push((self.core.name(), packet.clone()));
            if packet == probe_ping() {
                if state.answer_probes.load(Ordering::SeqCst) {
                    link.push(probe_pong());
                }
            } else if packet.kind == PacketType::Message
                && let Some(script) = &script
            {
                script(&link, &packet);
            }
        }

        if !state.manual_drain.load(Ordering::SeqCst) {
            link.drain();
        }
    }

    fn do_close(&mut self) {}
}
