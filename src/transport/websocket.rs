//! WebSocket transport.
//!
//! One Engine packet per WebSocket message. Text packets travel as text
//! frames; binary payloads travel as binary frames when the connection
//! supports them and as `'b' + base64` text otherwise.
//!
//! # Event Loop
//!
//! The I/O task connects, then selects over:
//!
//! - Incoming frames (decoded and reported as packets)
//! - Write batches and close requests from the engine
//!
//! Writability is restored only after the task has yielded once, so the
//! owner observes the drain on a later turn than the write.

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::protocol::engine::{Frame, Packet, encode_packet};

use super::{Transport, TransportCore};

// ============================================================================
// WsCommand
// ============================================================================

enum WsCommand {
    /// Send a batch, one message per packet.
    Write(Vec<Packet>),
    /// Close the socket.
    Close,
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket transport.
pub struct WebSocketTransport {
    core: TransportCore,
    command_tx: Option<mpsc::UnboundedSender<WsCommand>>,
}

impl WebSocketTransport {
    /// Creates a WebSocket transport.
    #[must_use]
    pub fn new(core: TransportCore) -> Self {
        Self {
            core,
            command_tx: None,
        }
    }

    fn command(&self, command: WsCommand) {
        if let Some(tx) = &self.command_tx
            && tx.send(command).is_err()
        {
            trace!("WebSocket task already stopped");
        }
    }

    /// I/O task.
    async fn run(core: TransportCore, mut command_rx: mpsc::UnboundedReceiver<WsCommand>) {
        let scheme = if core.options().secure { "wss" } else { "ws" };
        let uri = core.uri(scheme, false);
        debug!(%uri, "Connecting WebSocket");

        let connected = tokio::select! {
            result = connect_async(uri.as_str()) => result,
            _ = command_rx.recv() => {
                debug!("WebSocket closed while connecting");
                return;
            }
        };

        let ws_stream = match connected {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                core.on_error(TransportError::new("websocket error").with_description(e));
                return;
            }
        };

        core.on_open();
        let supports_binary = core.options().supports_binary;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            core.on_frame(Frame::Text(text.to_string()));
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            core.on_frame(Frame::Binary(bytes));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            core.on_close(Some("websocket connection closed".to_string()));
                            break;
                        }

                        Some(Err(e)) => {
                            core.on_error(TransportError::new("websocket error").with_description(e));
                            break;
                        }

                        None => {
                            core.on_close(Some("websocket stream ended".to_string()));
                            break;
                        }

                        // Ping, Pong and raw frames
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(WsCommand::Write(packets)) => {
                            for packet in &packets {
                                let message = match encode_packet(packet, supports_binary) {
                                    Frame::Text(text) => Message::Text(text.into()),
                                    Frame::Binary(bytes) => Message::Binary(bytes),
                                };
                                if let Err(e) = ws_write.send(message).await {
                                    debug!(error = %e, "WebSocket write failed");
                                }
                            }
                            tokio::task::yield_now().await;
                            core.on_drain();
                            core.settle_pause();
                        }

                        Some(WsCommand::Close) | None => {
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        trace!(id = %core.id(), "WebSocket task terminated");
    }
}

impl Transport for WebSocketTransport {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn do_open(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.command_tx = Some(tx);
        tokio::spawn(Self::run(self.core.clone(), rx));
    }

    fn write(&mut self, packets: Vec<Packet>) {
        self.command(WsCommand::Write(packets));
    }

    fn do_close(&mut self) {
        self.command(WsCommand::Close);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::identifiers::TransportId;
    use crate::protocol::engine::PacketType;
    use crate::transport::{TransportEvent, TransportName, TransportOptions, TransportState};

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
            .1
    }

    fn transport(
        port: u16,
    ) -> (
        WebSocketTransport,
        mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let options = TransportOptions {
            hostname: "127.0.0.1".into(),
            port: Some(port),
            secure: false,
            path: "/engine.io/".into(),
            timestamp_requests: None,
            timestamp_param: "t".into(),
            supports_binary: true,
        };
        let core = TransportCore::new(
            TransportName::WebSocket,
            Arc::new(options),
            vec![("EIO".into(), "4".into()), ("transport".into(), "websocket".into())],
            tx,
        );
        (WebSocketTransport::new(core), rx)
    }

    #[tokio::test]
    async fn test_exchange_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            ws.send(Message::Text("3probe".into())).await.expect("send");
            ws.send(Message::Binary(Bytes::from_static(&[1, 2]))).await.expect("send");

            let mut received = Vec::new();
            while received.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => received.push(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => received.push(format!("{bytes:?}")),
                    _ => break,
                }
            }
            received
        });

        let (mut ws, mut rx) = transport(port);
        ws.open();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        assert_eq!(ws.state(), TransportState::Open);

        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Packet(Packet::with_data(PacketType::Pong, "probe"))
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Packet(Packet::message(Bytes::from_static(&[1, 2])))
        );

        ws.send(vec![
            Packet::with_data(PacketType::Ping, "probe"),
            Packet::message("hello"),
        ]);
        assert!(!ws.is_writable());
        assert_eq!(next_event(&mut rx).await, TransportEvent::Drain);
        assert!(ws.is_writable());

        let received = server.await.expect("server task");
        assert_eq!(received, vec!["2probe".to_string(), "4hello".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let (mut ws, mut rx) = transport(port);
        ws.open();
        match next_event(&mut rx).await {
            TransportEvent::Error(e) => assert_eq!(e.reason, "websocket error"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pause_when_idle_is_immediate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while ws.next().await.is_some() {}
        });

        let (mut ws, mut rx) = transport(port);
        ws.open();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        ws.pause();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Paused);
        assert_eq!(ws.state(), TransportState::Paused);
    }
}
