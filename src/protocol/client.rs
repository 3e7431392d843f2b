//! # Admin Client
//!
//! Typed packet I/O over one [`TcpTransport`] plus observer fan-out.
//!
//! The client is generic over the context `C` that observers receive, so the
//! session engine can hand its own state to the observers it registers while a
//! bare client (`C = ()`) works for scripts that only need send and receive.
//!
//! ## Example
//! ```no_run
//! use openttd_admin::core::packet::{AdminJoin, PacketType, ServerPacket};
//! use openttd_admin::protocol::client::AdminClient;
//! use openttd_admin::protocol::dispatcher::{Callback, Position};
//!
//! # async fn run() -> openttd_admin::error::Result<()> {
//! let mut client = AdminClient::<()>::with_address("localhost", 3977);
//! client.register_callback(
//!     PacketType::ServerWelcome,
//!     Callback::new("print", |_: &mut (), packet: &ServerPacket| {
//!         println!("{packet:?}");
//!         Ok(())
//!     }),
//!     Position::Append,
//! );
//! client.connect().await?;
//! client.send_packet(AdminJoin::new("password", "script", "1.0")).await?;
//! let packet = client.receive_packet(&mut ()).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{ClientConfig, CodecConfig};
use crate::core::packet::{AdminPacket, ServerPacket};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Callback, CallbackKey, CallbackTable, DispatchOutcome, Position};
use crate::transport::TcpTransport;
use crate::utils::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Packet-level client for the admin port.
///
/// `is_connected` is true exactly while a transport is held. The transport is
/// dropped when the peer closes the connection or the stream becomes unusable.
#[derive(Debug)]
pub struct AdminClient<C = ()> {
    host: String,
    port: u16,
    connect_timeout: Duration,
    socket_timeout: Duration,
    codec: CodecConfig,
    transport: Option<TcpTransport>,
    callbacks: CallbackTable<C>,
    metrics: Arc<Metrics>,
}

impl<C> AdminClient<C> {
    /// Client for the configured server, not yet connected
    pub fn new(config: &ClientConfig, codec: CodecConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout,
            socket_timeout: config.socket_timeout,
            codec,
            transport: None,
            callbacks: CallbackTable::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Client with default timeouts and a lenient codec
    pub fn with_address(host: impl Into<String>, port: u16) -> Self {
        let config = ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        };
        Self::new(&config, CodecConfig::default())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn codec(&self) -> CodecConfig {
        self.codec
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Shared handle to this client's counters
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn callbacks(&self) -> &CallbackTable<C> {
        &self.callbacks
    }

    /// Register one observer for a packet kind or for every packet.
    pub fn register_callback(
        &mut self,
        key: impl Into<CallbackKey>,
        callback: Callback<C>,
        position: Position,
    ) {
        self.callbacks.register(key, callback, position);
    }

    /// Register several observers as one block.
    pub fn register_callbacks(
        &mut self,
        key: impl Into<CallbackKey>,
        callbacks: Vec<Callback<C>>,
        position: Position,
    ) {
        self.callbacks.register_all(key, callbacks, position);
    }

    /// Open the TCP connection.
    #[instrument(skip(self), fields(host = %self.host, port = self.port))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            error!("{}", constants::ERR_ALREADY_CONNECTED);
            return Err(ProtocolError::AlreadyConnected);
        }

        match TcpTransport::connect(
            &self.host,
            self.port,
            self.connect_timeout,
            self.socket_timeout,
        )
        .await
        {
            Ok(transport) => {
                self.metrics.connection_established();
                self.transport = Some(transport);
                Ok(())
            }
            Err(e) => {
                self.metrics.connection_error();
                error!(error = %e, "Failed to connect");
                Err(e)
            }
        }
    }

    /// Close the connection if there is one.
    pub async fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
            info!(host = %self.host, port = self.port, "Disconnected from server");
        }
    }

    /// Encode and send one packet.
    ///
    /// With a lenient codec a field that fails to encode truncates the packet
    /// there; a strict codec returns the error and sends nothing.
    pub async fn send_packet(&mut self, packet: impl Into<AdminPacket>) -> Result<()> {
        let packet = packet.into();
        let frame = packet.encode(self.codec.strict_encode)?;
        let size = frame.len();

        let sent = self.transport_mut()?.send(frame).await;
        if let Err(e) = sent {
            return Err(self.on_transport_error(e));
        }

        self.metrics.packet_sent(size);
        debug!(packet = packet.name(), size, "Sent packet");
        Ok(())
    }

    /// Block for the next packet, up to the socket timeout, and dispatch it.
    pub async fn receive_packet(&mut self, ctx: &mut C) -> Result<ServerPacket> {
        let wait = self.socket_timeout;
        self.try_receive_packet(ctx, wait)
            .await?
            .ok_or(ProtocolError::Timeout)
    }

    /// Wait up to `wait` for the next packet and dispatch it.
    ///
    /// `Ok(None)` means no complete frame arrived in time. Frames that fail to
    /// decode are counted and returned as errors without touching the
    /// connection.
    pub async fn try_receive_packet(
        &mut self,
        ctx: &mut C,
        wait: Duration,
    ) -> Result<Option<ServerPacket>> {
        let received = self.transport_mut()?.next_frame(wait).await;
        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.on_transport_error(e)),
        };

        let packet = self.decode_frame(&frame)?;
        self.dispatch(ctx, &packet);
        Ok(Some(packet))
    }

    /// Decode one complete frame, counting it in the metrics.
    pub fn decode_frame(&self, frame: &[u8]) -> Result<ServerPacket> {
        self.metrics.packet_received(frame.len());
        match ServerPacket::decode(frame, self.codec.strict_decode) {
            Ok(ServerPacket::Unknown(unknown)) => {
                self.metrics.unknown_packet();
                warn!(
                    tag = unknown.tag,
                    payload_len = unknown.payload.len(),
                    "{}",
                    constants::ERR_UNKNOWN_PACKET
                );
                Ok(ServerPacket::Unknown(unknown))
            }
            Ok(packet) => {
                debug!(?packet, "Received packet");
                Ok(packet)
            }
            Err(e) => {
                self.metrics.decode_error();
                error!(error = %e, frame_len = frame.len(), "Failed to decode frame");
                Err(e)
            }
        }
    }

    /// Run the observers for a packet that has already been received.
    pub fn dispatch(&mut self, ctx: &mut C, packet: &ServerPacket) -> DispatchOutcome {
        let outcome = self.callbacks.dispatch(ctx, packet);
        for _ in 0..outcome.failed {
            self.metrics.observer_failure();
        }
        outcome
    }

    fn transport_mut(&mut self) -> Result<&mut TcpTransport> {
        self.transport.as_mut().ok_or(ProtocolError::NotConnected)
    }

    // Timeouts leave the stream usable; anything else ends the connection.
    fn on_transport_error(&mut self, error: ProtocolError) -> ProtocolError {
        if !matches!(error, ProtocolError::Timeout) && self.transport.take().is_some() {
            warn!(
                host = %self.host,
                port = self.port,
                error = %error,
                "Dropping connection"
            );
        }
        error
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::core::packet::{AdminPing, PacketType, ServerPong};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn connected() -> (AdminClient<Vec<u32>>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = AdminClient::with_address("127.0.0.1", port);
        let (connected, accepted) = tokio::join!(client.connect(), listener.accept());
        connected.unwrap();
        (client, accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut client = AdminClient::<()>::with_address("127.0.0.1", 1);
        assert!(!client.is_connected());
        assert!(matches!(
            client.send_packet(AdminPing::new(1)).await,
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            client.try_receive_packet(&mut (), Duration::ZERO).await,
            Err(ProtocolError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let (mut client, _server) = connected().await;
        assert!(matches!(
            client.connect().await,
            Err(ProtocolError::AlreadyConnected)
        ));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_ping_pong_dispatch() {
        let (mut client, mut server) = connected().await;
        client.register_callback(
            PacketType::ServerPong,
            Callback::new("pong", |seen: &mut Vec<u32>, packet: &ServerPacket| {
                if let ServerPacket::Pong(pong) = packet {
                    seen.extend(pong.data);
                }
                Ok(())
            }),
            Position::Append,
        );

        client.send_packet(AdminPing::new(42)).await.unwrap();
        let mut sent = [0u8; 7];
        server.read_exact(&mut sent).await.unwrap();
        assert_eq!(sent, [7, 0, 7, 42, 0, 0, 0]);

        let pong = ServerPacket::from(ServerPong { data: Some(42) }).encode(true).unwrap();
        server.write_all(&pong).await.unwrap();

        let mut seen = Vec::new();
        let packet = client.receive_packet(&mut seen).await.unwrap();
        assert_eq!(packet.packet_type(), PacketType::ServerPong);
        assert_eq!(seen, [42]);

        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.packets_received, 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_not_an_error() {
        let (mut client, mut server) = connected().await;
        server.write_all(&[5, 0, 99, 1, 2]).await.unwrap();

        let packet = client.receive_packet(&mut Vec::new()).await.unwrap();
        match packet {
            ServerPacket::Unknown(unknown) => {
                assert_eq!(unknown.tag, 99);
                assert_eq!(&unknown.payload[..], &[1, 2]);
            }
            other => panic!("expected unknown packet, got {other:?}"),
        }
        assert_eq!(client.metrics().snapshot().unknown_packets, 1);
    }

    #[tokio::test]
    async fn test_peer_close_drops_transport() {
        let (mut client, server) = connected().await;
        drop(server);
        assert!(matches!(
            client.receive_packet(&mut Vec::new()).await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_idle_wait_keeps_connection() {
        let (mut client, _server) = connected().await;
        let packet = client
            .try_receive_packet(&mut Vec::new(), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(packet.is_none());
        assert!(client.is_connected());
    }
}
