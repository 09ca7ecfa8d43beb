//! HTTP long-polling transport.
//!
//! Receives by issuing one outstanding GET at a time and sends by POSTing
//! payloads of record-separated packets. Requests run inside an I/O task so
//! that a poll and a write can be in flight concurrently.
//!
//! # Pausing
//!
//! A pause completes only once the current poll has returned and the
//! current write has drained; no new requests are started meanwhile.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result, TransportError};
use crate::protocol::engine::{Packet, PacketType, decode_payload, encode_payload};

use super::{Transport, TransportCore, TransportState, maybe};

// ============================================================================
// HttpClient
// ============================================================================

/// Minimal HTTP client used by the polling transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs a GET and returns the response body.
    async fn get(&self, url: &str) -> Result<String>;

    /// Performs a POST of a text body.
    async fn post(&self, url: &str, body: String) -> Result<()>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing `reqwest` client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::connection(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| Error::connection(e.to_string()))
    }

    async fn post(&self, url: &str, body: String) -> Result<()> {
        self.client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::connection(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// PollCommand
// ============================================================================

enum PollCommand {
    /// POST an encoded payload.
    Write(String),
    /// Pause once requests settle.
    Pause,
    /// Stop; send a close packet first if the transport was open.
    Close { was_open: bool },
}

// ============================================================================
// PollingTransport
// ============================================================================

/// HTTP long-polling transport.
pub struct PollingTransport {
    core: TransportCore,
    http: Arc<dyn HttpClient>,
    command_tx: Option<mpsc::UnboundedSender<PollCommand>>,
}

impl PollingTransport {
    /// Creates a polling transport using `http` for requests.
    #[must_use]
    pub fn new(core: TransportCore, http: Arc<dyn HttpClient>) -> Self {
        Self {
            core,
            http,
            command_tx: None,
        }
    }

    fn command(&self, command: PollCommand) {
        if let Some(tx) = &self.command_tx
            && tx.send(command).is_err()
        {
            trace!("Polling task already stopped");
        }
    }

    /// Request URI for the current session.
    fn uri(core: &TransportCore) -> String {
        let scheme = if core.options().secure { "https" } else { "http" };
        core.uri(scheme, true)
    }

    /// I/O task.
    async fn run(
        core: TransportCore,
        http: Arc<dyn HttpClient>,
        mut command_rx: mpsc::UnboundedReceiver<PollCommand>,
    ) {
        let mut poll: Option<BoxFuture<'static, Result<String>>> =
            Some(Self::start_poll(&core, &http));
        let mut write: Option<BoxFuture<'static, Result<()>>> = None;
        let mut queued: VecDeque<String> = VecDeque::new();
        let mut pausing = false;

        loop {
            tokio::select! {
                result = maybe(&mut poll), if poll.is_some() => {
                    poll = None;
                    match result {
                        Ok(body) => {
                            if !Self::on_data(&core, &body) {
                                break;
                            }
                            if pausing {
                                if write.is_none() {
                                    pausing = false;
                                    core.on_paused();
                                }
                            } else if core.state() == TransportState::Open {
                                poll = Some(Self::start_poll(&core, &http));
                            } else {
                                trace!(state = ?core.state(), "Not polling");
                            }
                        }
                        Err(e) => {
                            core.on_error(TransportError::new("poll error").with_description(e));
                        }
                    }
                }

                result = maybe(&mut write), if write.is_some() => {
                    write = None;
                    match result {
                        Ok(()) => {
                            if let Some(next) = queued.pop_front() {
                                write = Some(Self::start_write(&core, &http, next));
                            } else {
                                core.on_drain();
                                if pausing && poll.is_none() {
                                    pausing = false;
                                    core.on_paused();
                                }
                            }
                        }
                        Err(e) => {
                            core.on_error(TransportError::new("post error").with_description(e));
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(PollCommand::Write(payload)) => {
                            if write.is_none() {
                                write = Some(Self::start_write(&core, &http, payload));
                            } else {
                                queued.push_back(payload);
                            }
                        }

                        Some(PollCommand::Pause) => {
                            if poll.is_none() && write.is_none() {
                                core.on_paused();
                            } else {
                                debug!(
                                    polling = poll.is_some(),
                                    writing = write.is_some(),
                                    "Pause waiting for requests"
                                );
                                pausing = true;
                            }
                        }

                        Some(PollCommand::Close { was_open }) => {
                            if was_open {
                                let payload = encode_payload(&[Packet::new(PacketType::Close)]);
                                if let Err(e) = http.post(&Self::uri(&core), payload).await {
                                    debug!(error = %e, "Failed to send close packet");
                                }
                            }
                            break;
                        }

                        None => break,
                    }
                }
            }
        }

        trace!(id = %core.id(), "Polling task terminated");
    }

    fn start_poll(
        core: &TransportCore,
        http: &Arc<dyn HttpClient>,
    ) -> BoxFuture<'static, Result<String>> {
        let http = Arc::clone(http);
        let uri = Self::uri(core);
        trace!(%uri, "Polling");
        Box::pin(async move { http.get(&uri).await })
    }

    fn start_write(
        core: &TransportCore,
        http: &Arc<dyn HttpClient>,
        payload: String,
    ) -> BoxFuture<'static, Result<()>> {
        let http = Arc::clone(http);
        let uri = Self::uri(core);
        Box::pin(async move { http.post(&uri, payload).await })
    }

    /// Handles one poll response. Returns `false` once the transport closed.
    fn on_data(core: &TransportCore, body: &str) -> bool {
        for decoded in decode_payload(body) {
            let packet = match decoded {
                Ok(packet) => packet,
                Err(e) => {
                    core.on_error(TransportError::new("parse error").with_description(e));
                    return true;
                }
            };

            if core.state() == TransportState::Opening && packet.kind == PacketType::Open {
                core.on_open();
            }

            if packet.kind == PacketType::Close {
                core.on_close(Some("transport closed by the server".to_string()));
                return false;
            }

            core.on_packet(packet);
        }
        true
    }
}

impl Transport for PollingTransport {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn do_open(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.command_tx = Some(tx);
        tokio::spawn(Self::run(self.core.clone(), Arc::clone(&self.http), rx));
    }

    fn write(&mut self, packets: Vec<Packet>) {
        self.command(PollCommand::Write(encode_payload(&packets)));
    }

    fn do_pause(&mut self) {
        self.command(PollCommand::Pause);
    }

    fn do_close(&mut self) {
        let was_open = self.core.state() == TransportState::Open;
        if !was_open {
            warn!("Closing polling transport before it opened");
        }
        self.command(PollCommand::Close { was_open });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use crate::identifiers::TransportId;
    use crate::transport::{TransportEvent, TransportName, TransportOptions};

    /// Scripted HTTP server: GETs pop queued bodies, POSTs are recorded.
    #[derive(Default)]
    struct ScriptedHttp {
        bodies: Mutex<VecDeque<String>>,
        posts: Mutex<Vec<(String, String)>>,
        gets: Mutex<Vec<String>>,
        ready: Notify,
    }

    impl ScriptedHttp {
        fn push(&self, body: &str) {
            self.bodies.lock().push_back(body.to_string());
            self.ready.notify_one();
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn get(&self, url: &str) -> Result<String> {
            self.gets.lock().push(url.to_string());
            loop {
                if let Some(body) = self.bodies.lock().pop_front() {
                    return Ok(body);
                }
                self.ready.notified().await;
            }
        }

        async fn post(&self, url: &str, body: String) -> Result<()> {
            self.posts.lock().push((url.to_string(), body));
            Ok(())
        }
    }

    fn transport(
        http: Arc<ScriptedHttp>,
    ) -> (
        PollingTransport,
        mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let options = TransportOptions {
            hostname: "localhost".into(),
            port: Some(3000),
            secure: false,
            path: "/engine.io/".into(),
            timestamp_requests: Some(false),
            timestamp_param: "t".into(),
            supports_binary: true,
        };
        let core = TransportCore::new(
            TransportName::Polling,
            Arc::new(options),
            vec![("EIO".into(), "4".into()), ("transport".into(), "polling".into())],
            tx,
        );
        (PollingTransport::new(core, http), rx)
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
            .1
    }

    #[tokio::test]
    async fn test_open_on_handshake_payload() {
        let http = Arc::new(ScriptedHttp::default());
        let (mut polling, mut rx) = transport(Arc::clone(&http));
        polling.open();
        http.push(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000}"#);

        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        match next_event(&mut rx).await {
            TransportEvent::Packet(p) => assert_eq!(p.kind, PacketType::Open),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(polling.state(), TransportState::Open);
        assert!(polling.is_writable());
        assert_eq!(
            http.gets.lock()[0],
            "http://localhost:3000/engine.io/?EIO=4&transport=polling"
        );
    }

    #[tokio::test]
    async fn test_write_posts_payload_and_drains() {
        let http = Arc::new(ScriptedHttp::default());
        let (mut polling, mut rx) = transport(Arc::clone(&http));
        polling.open();
        http.push(r#"0{"sid":"abc"}"#);
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        let _ = next_event(&mut rx).await;

        polling.send(vec![Packet::message("a"), Packet::message("b")]);
        assert!(!polling.is_writable());
        assert_eq!(next_event(&mut rx).await, TransportEvent::Drain);
        assert!(polling.is_writable());
        assert_eq!(http.posts.lock()[0].1, "4a\u{1e}4b");
    }

    #[tokio::test]
    async fn test_server_close_packet_closes_transport() {
        let http = Arc::new(ScriptedHttp::default());
        let (mut polling, mut rx) = transport(Arc::clone(&http));
        polling.open();
        http.push("0{}\u{1e}1");

        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        let _ = next_event(&mut rx).await;
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close { .. }
        ));
        assert_eq!(polling.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_pause_waits_for_outstanding_poll() {
        let http = Arc::new(ScriptedHttp::default());
        let (mut polling, mut rx) = transport(Arc::clone(&http));
        polling.open();
        http.push("0{}");
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        let _ = next_event(&mut rx).await;

        // A second poll is now outstanding.
        polling.pause();
        assert_eq!(polling.state(), TransportState::Pausing);
        http.push("6");
        match next_event(&mut rx).await {
            TransportEvent::Packet(p) => assert_eq!(p.kind, PacketType::Noop),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next_event(&mut rx).await, TransportEvent::Paused);
        assert_eq!(polling.state(), TransportState::Paused);
    }

    #[tokio::test]
    async fn test_send_while_closed_is_dropped() {
        let http = Arc::new(ScriptedHttp::default());
        let (mut polling, _rx) = transport(Arc::clone(&http));
        polling.send(vec![Packet::message("lost")]);
        assert!(http.posts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_sends_close_packet() {
        let http = Arc::new(ScriptedHttp::default());
        let (mut polling, mut rx) = transport(Arc::clone(&http));
        polling.open();
        http.push("0{}");
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        let _ = next_event(&mut rx).await;

        polling.close();
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close { description: None }
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(http.posts.lock()[0].1, "1");
    }
}
