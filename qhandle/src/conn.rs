use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use quinn::VarInt;

use crate::{Error, Result, stream::Stream};

/// An established QUIC connection.
///
/// Cloning is cheap, all clones refer to the same connection. The connection is closed when
/// [`Connection::close`] is called or the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: quinn::Connection,
    // the endpoint carrying this connection, kept for its local address
    endpoint: quinn::Endpoint,
}

impl Connection {
    pub(crate) fn new(inner: quinn::Connection, endpoint: quinn::Endpoint) -> Self {
        Self { inner, endpoint }
    }

    /// Open a new bidirectional stream.
    ///
    /// The peer learns about the stream only once data is written to it.
    pub async fn open_stream(&self) -> Result<Stream> {
        let (writer, reader) = self.inner.open_bi().await?;
        tracing::debug!(sid = %writer.id(), "opened bidi stream");
        Ok(Stream::new(writer, reader))
    }

    /// Wait for the peer to start a bidirectional stream.
    pub async fn accept_stream(&self) -> Result<Stream> {
        let (writer, reader) = self.inner.accept_bi().await?;
        tracing::debug!(sid = %writer.id(), "accepted bidi stream");
        Ok(Stream::new(writer, reader))
    }

    /// Send an unreliable message as a QUIC datagram.
    pub fn send_message(&self, message: impl Into<Bytes>) -> Result<()> {
        self.inner.send_datagram(message.into())?;
        Ok(())
    }

    /// Receive the next QUIC datagram sent by the peer.
    pub async fn receive_message(&self) -> Result<Bytes> {
        Ok(self.inner.read_datagram().await?)
    }

    /// The largest message [`Connection::send_message`] can currently send, `None` if the peer
    /// does not accept datagrams.
    pub fn max_message_size(&self) -> Option<usize> {
        self.inner.max_datagram_size()
    }

    /// Close the connection immediately, pending stream data is discarded.
    pub fn close(&self, code: u32, reason: &str) {
        tracing::debug!(remote = %self.remote_addr(), code, reason, "closing connection");
        self.inner.close(VarInt::from_u32(code), reason.as_bytes());
    }

    /// Wait for the connection to be closed, for any reason.
    pub async fn closed(&self) -> Error {
        Error::Connection(self.inner.closed().await)
    }

    /// Why the connection was closed, `None` while it is alive.
    pub fn close_reason(&self) -> Option<Error> {
        self.inner.close_reason().map(Error::Connection)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.close_reason().is_none()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    pub fn rtt(&self) -> Duration {
        self.inner.rtt()
    }

    pub fn stable_id(&self) -> usize {
        self.inner.stable_id()
    }

    /// The server name the client asked for (SNI), if any.
    pub fn server_name(&self) -> Option<String> {
        self.handshake_data()?.server_name
    }

    /// The application protocol negotiated during the handshake.
    pub fn alpn(&self) -> Option<Vec<u8>> {
        self.handshake_data()?.protocol
    }

    fn handshake_data(&self) -> Option<quinn::crypto::rustls::HandshakeData> {
        self.inner
            .handshake_data()?
            .downcast::<quinn::crypto::rustls::HandshakeData>()
            .ok()
            .map(|data| *data)
    }

    /// The underlying quinn connection.
    pub fn inner(&self) -> &quinn::Connection {
        &self.inner
    }
}
