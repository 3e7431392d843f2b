use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::with_timeout;

/// One TCP connection to the admin port, framed with [`FrameCodec`].
///
/// Frames are read strictly one at a time; bytes of a following frame stay in
/// the codec buffer until the next read.
#[derive(Debug)]
pub struct TcpTransport {
    framed: Framed<TcpStream, FrameCodec>,
    peer: String,
    socket_timeout: Duration,
}

impl TcpTransport {
    /// Connect to `host:port`.
    ///
    /// `connect_timeout` bounds the TCP handshake, `socket_timeout` every later
    /// send and blocking receive.
    #[instrument(skip(connect_timeout, socket_timeout))]
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        socket_timeout: Duration,
    ) -> Result<Self> {
        let peer = format!("{host}:{port}");
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await
        {
            Err(_) => return Err(ProtocolError::ConnectTimeout(peer)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ProtocolError::ConnectRefused(peer))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(stream)) => stream,
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle's algorithm");
        }
        info!(peer = %peer, "Connected to admin port");

        Ok(Self {
            framed: Framed::new(stream, FrameCodec),
            peer,
            socket_timeout,
        })
    }

    /// Address this transport is connected to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// Write one complete frame and flush it.
    pub async fn send(&mut self, frame: Bytes) -> Result<()> {
        let framed = &mut self.framed;
        with_timeout(self.socket_timeout, async move {
            framed.send(frame).await.map_err(closed_on_reset)
        })
        .await
    }

    /// Wait up to `wait` for the next frame.
    ///
    /// `Ok(None)` means nothing arrived in time, which is not an error. A zero
    /// wait still returns a frame that is already buffered. The peer closing the
    /// connection is reported as [`ProtocolError::ConnectionClosed`].
    pub async fn next_frame(&mut self, wait: Duration) -> Result<Option<BytesMut>> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
            Ok(Some(Err(e))) => Err(closed_on_reset(e)),
            Ok(None) => {
                debug!(peer = %self.peer, "{}", constants::ERR_CONNECTION_CLOSED);
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Block for the next frame, up to the socket timeout.
    pub async fn receive_frame(&mut self) -> Result<BytesMut> {
        self.next_frame(self.socket_timeout)
            .await?
            .ok_or(ProtocolError::Timeout)
    }

    /// Shut the connection down. Failures are logged, not returned.
    #[instrument(skip(self), fields(peer = %self.peer))]
    pub async fn disconnect(self) {
        let mut stream = self.framed.into_inner();
        match stream.shutdown().await {
            Ok(()) => debug!("Connection shut down"),
            Err(e) => warn!(error = %e, "Error while shutting down connection"),
        }
    }
}

fn closed_on_reset(error: ProtocolError) -> ProtocolError {
    match error {
        ProtocolError::Io(e)
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) =>
        {
            ProtocolError::ConnectionClosed
        }
        other => other,
    }
}
