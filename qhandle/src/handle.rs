use std::{net::SocketAddr, sync::Arc};

use crate::{Connection, Error, Result, StreamConn, client::QuicClient, handy};

/// A handle to at most one QUIC connection and the stream it carries.
///
/// The handle is empty after [`QuicHandle::init`] and after [`QuicHandle::close`], and holds a
/// connection only between a successful [`QuicHandle::connect`] and the next close. A failed
/// connect leaves the handle as it was; a send or receive that finds the connection lost empties
/// it, so the next connect starts over.
///
/// ```no_run
/// # async fn demo() -> qhandle::Result<()> {
/// let mut handle = qhandle::QuicHandle::init();
/// handle.connect("localhost", 4433).await?;
/// handle.send(b"hello").await?;
/// handle.close().await
/// # }
/// ```
#[derive(Default)]
pub struct QuicHandle {
    client: Option<Arc<QuicClient>>,
    conn: Option<StreamConn>,
}

impl QuicHandle {
    /// An empty handle that connects with a client trusting the platform's root certificates.
    pub fn init() -> Self {
        Self::default()
    }

    /// An empty handle that connects with `client`, which decides roots, verification and
    /// parameters.
    pub fn with_client(client: Arc<QuicClient>) -> Self {
        Self {
            client: Some(client),
            conn: None,
        }
    }

    /// Reset the handle to the empty state, dropping the connection it held.
    pub fn init_in_place(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.connection().close(0, "reset");
        }
        Ok(())
    }

    fn client(&mut self) -> Result<Arc<QuicClient>> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = Arc::new(
            QuicClient::builder()
                .with_native_roots()
                .with_parameters(handy::client_parameters())
                .build()?,
        );
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Connect to `host:port` and open the stream [`send`] and [`receive`] use.
    ///
    /// Every address `host` resolves to is tried in order. Fails with
    /// [`Error::AlreadyConnected`] while the handle holds a live connection.
    ///
    /// [`send`]: QuicHandle::send
    /// [`receive`]: QuicHandle::receive
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(conn) = &self.conn {
            if conn.connection().is_alive() {
                return Err(Error::AlreadyConnected(conn.remote_addr()));
            }
            tracing::debug!(remote = %conn.remote_addr(), "releasing lost connection");
            self.conn = None;
        }

        let client = self.client()?;
        let connection = client.connect(host, port).await?;
        let stream = match connection.open_stream().await {
            Ok(stream) => stream,
            Err(error) => {
                connection.close(0, "failed to open stream");
                return Err(error);
            }
        };
        self.conn = Some(StreamConn::new(connection, stream));
        Ok(())
    }

    fn live_conn(&mut self) -> Result<&mut StreamConn> {
        self.conn.as_mut().ok_or(Error::NotConnected)
    }

    /// Send all of `data` over the stream.
    ///
    /// If the connection turns out to be lost, the handle is emptied.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let conn = self.live_conn()?;
        if data.is_empty() {
            return Ok(());
        }
        let result = conn.write(data).await;
        self.release_if_lost();
        result
    }

    /// Receive up to `buf.len()` bytes, waiting for at least one.
    ///
    /// Returns `Ok(0)` once the peer finished its side of the stream.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let conn = self.live_conn()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = conn.read(buf).await;
        self.release_if_lost();
        result
    }

    fn release_if_lost(&mut self) {
        if let Some(conn) = &self.conn
            && let Some(reason) = conn.connection().close_reason()
        {
            tracing::debug!(remote = %conn.remote_addr(), %reason, "connection lost");
            self.conn = None;
        }
    }

    /// Finish the stream, close the connection and empty the handle.
    ///
    /// Closing an empty handle succeeds. The handle is empty afterwards even if closing reports
    /// that the connection had broken down before.
    pub async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(StreamConn::remote_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref()?.local_addr().ok()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref().map(StreamConn::connection)
    }

    pub fn stream_conn(&mut self) -> Option<&mut StreamConn> {
        self.conn.as_mut()
    }
}

impl Drop for QuicHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.connection().close(0, "dropped");
        }
    }
}
