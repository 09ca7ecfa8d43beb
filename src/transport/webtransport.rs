//! WebTransport transport.
//!
//! Runs over one bidirectional stream of a WebTransport session using the
//! length-prefixed framing from [`crate::protocol::framing`]. Session setup
//! is delegated to a [`WebTransportConnector`]; the transport only needs a
//! duplex byte stream.
//!
//! The first frame written is an `open` packet, carrying `{"sid": ...}`
//! when joining an existing session as an upgrade.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::protocol::engine::{Packet, PacketType};
use crate::protocol::framing::{StreamDecoder, encode_frame};

use super::{Transport, TransportCore};

// ============================================================================
// Constants
// ============================================================================

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 16 * 1024;

// ============================================================================
// Connector
// ============================================================================

/// Duplex byte stream of an established WebTransport session.
pub trait BidiStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> BidiStream for T {}

/// Establishes WebTransport sessions.
#[async_trait]
pub trait WebTransportConnector: Send + Sync {
    /// Opens a session to `url` and returns its bidirectional stream.
    async fn connect(&self, url: &str) -> Result<Box<dyn BidiStream>>;
}

// ============================================================================
// WtCommand
// ============================================================================

enum WtCommand {
    Write(Vec<Packet>),
    Close,
}

// ============================================================================
// WebTransportTransport
// ============================================================================

/// WebTransport transport.
pub struct WebTransportTransport {
    core: TransportCore,
    connector: Arc<dyn WebTransportConnector>,
    command_tx: Option<mpsc::UnboundedSender<WtCommand>>,
}

impl WebTransportTransport {
    /// Creates a WebTransport transport using `connector`.
    #[must_use]
    pub fn new(core: TransportCore, connector: Arc<dyn WebTransportConnector>) -> Self {
        Self {
            core,
            connector,
            command_tx: None,
        }
    }

    fn command(&self, command: WtCommand) {
        if let Some(tx) = &self.command_tx
            && tx.send(command).is_err()
        {
            trace!("WebTransport task already stopped");
        }
    }

    /// I/O task.
    async fn run(
        core: TransportCore,
        connector: Arc<dyn WebTransportConnector>,
        mut command_rx: mpsc::UnboundedReceiver<WtCommand>,
    ) {
        let uri = core.uri("https", false);
        debug!(%uri, "Opening WebTransport session");

        let connected = tokio::select! {
            result = connector.connect(&uri) => result,
            _ = command_rx.recv() => {
                debug!("WebTransport closed while connecting");
                return;
            }
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                core.on_error(TransportError::new("webtransport error").with_description(e));
                return;
            }
        };
        let (mut reader, mut writer) = tokio::io::split(stream);

        let open = match core.sid() {
            Some(sid) => Packet::with_data(
                PacketType::Open,
                serde_json::json!({ "sid": sid }).to_string(),
            ),
            None => Packet::new(PacketType::Open),
        };
        if let Err(e) = writer.write_all(&encode_frame(&open)).await {
            core.on_error(TransportError::new("webtransport error").with_description(e));
            return;
        }

        core.on_open();
        let mut decoder = StreamDecoder::new(u64::MAX);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                read = reader.read(&mut buffer) => {
                    match read {
                        Ok(0) => {
                            core.on_close(Some("webtransport stream closed".to_string()));
                            break;
                        }
                        Ok(n) => {
                            for decoded in decoder.push(&buffer[..n]) {
                                match decoded {
                                    Ok(packet) => core.on_packet(packet),
                                    Err(e) => {
                                        core.on_error(
                                            TransportError::new("parse error").with_description(e),
                                        );
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            core.on_error(TransportError::new("webtransport error").with_description(e));
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(WtCommand::Write(packets)) => {
                            for packet in &packets {
                                if let Err(e) = writer.write_all(&encode_frame(packet)).await {
                                    debug!(error = %e, "WebTransport write failed");
                                }
                            }
                            if let Err(e) = writer.flush().await {
                                debug!(error = %e, "WebTransport flush failed");
                            }
                            tokio::task::yield_now().await;
                            core.on_drain();
                            core.settle_pause();
                        }

                        Some(WtCommand::Close) | None => {
                            let _ = writer.shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        trace!(id = %core.id(), "WebTransport task terminated");
    }
}

impl Transport for WebTransportTransport {
    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn do_open(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.command_tx = Some(tx);
        tokio::spawn(Self::run(
            self.core.clone(),
            Arc::clone(&self.connector),
            rx,
        ));
    }

    fn write(&mut self, packets: Vec<Packet>) {
        self.command(WtCommand::Write(packets));
    }

    fn do_close(&mut self) {
        self.command(WtCommand::Close);
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
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    use crate::error::Error;
    use crate::identifiers::TransportId;
    use crate::transport::{TransportEvent, TransportName, TransportOptions, TransportState};

    /// Hands out one end of an in-memory pipe.
    struct PipeConnector {
        client: Mutex<Option<DuplexStream>>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WebTransportConnector for PipeConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn BidiStream>> {
            self.urls.lock().push(url.to_string());
            let stream = self
                .client
                .lock()
                .take()
                .ok_or_else(|| Error::connection("pipe already used"))?;
            Ok(Box::new(stream))
        }
    }

    fn transport(
        sid: Option<&str>,
    ) -> (
        WebTransportTransport,
        DuplexStream,
        Arc<PipeConnector>,
        mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) {
        let (client, server) = tokio::io::duplex(1024);
        let connector = Arc::new(PipeConnector {
            client: Mutex::new(Some(client)),
            urls: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let options = TransportOptions {
            hostname: "localhost".into(),
            port: Some(4433),
            secure: true,
            path: "/engine.io/".into(),
            timestamp_requests: None,
            timestamp_param: "t".into(),
            supports_binary: true,
        };
        let core = TransportCore::new(
            TransportName::WebTransport,
            Arc::new(options),
            vec![("EIO".into(), "4".into()), ("transport".into(), "webtransport".into())],
            tx,
        );
        if let Some(sid) = sid {
            core.set_sid(sid);
        }
        let connector_dyn: Arc<dyn WebTransportConnector> = connector.clone();
        (
            WebTransportTransport::new(core, connector_dyn),
            server,
            connector,
            rx,
        )
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

    async fn read_packets(server: &mut DuplexStream, count: usize) -> Vec<Packet> {
        let mut decoder = StreamDecoder::new(u64::MAX);
        let mut packets = Vec::new();
        let mut buffer = [0u8; 256];
        while packets.len() < count {
            let n = server.read(&mut buffer).await.expect("read");
            assert!(n > 0, "stream closed early");
            packets.extend(decoder.push(&buffer[..n]).into_iter().map(|p| p.expect("frame")));
        }
        packets
    }

    #[tokio::test]
    async fn test_open_writes_open_frame() {
        let (mut wt, mut server, connector, mut rx) = transport(None);
        wt.open();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        assert_eq!(wt.state(), TransportState::Open);

        let packets = read_packets(&mut server, 1).await;
        assert_eq!(packets, vec![Packet::new(PacketType::Open)]);
        assert_eq!(
            connector.urls.lock()[0],
            "https://localhost:4433/engine.io/?EIO=4&transport=webtransport"
        );
    }

    #[tokio::test]
    async fn test_upgrade_open_carries_sid() {
        let (mut wt, mut server, _connector, mut rx) = transport(Some("abc"));
        wt.open();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);

        let packets = read_packets(&mut server, 1).await;
        assert_eq!(packets[0].text(), Some(r#"{"sid":"abc"}"#));
    }

    #[tokio::test]
    async fn test_frames_in_both_directions() {
        let (mut wt, mut server, _connector, mut rx) = transport(None);
        wt.open();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        let _ = read_packets(&mut server, 1).await;

        let mut inbound = encode_frame(&Packet::with_data(PacketType::Open, "{}")).to_vec();
        inbound.extend_from_slice(&encode_frame(&Packet::message(bytes::Bytes::from_static(&[7]))));
        server.write_all(&inbound).await.expect("write");

        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Packet(Packet::with_data(PacketType::Open, "{}"))
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Packet(Packet::message(bytes::Bytes::from_static(&[7])))
        );

        wt.send(vec![Packet::message("hi")]);
        assert_eq!(next_event(&mut rx).await, TransportEvent::Drain);
        assert_eq!(read_packets(&mut server, 1).await, vec![Packet::message("hi")]);

        drop(server);
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close { .. }
        ));
    }
}
