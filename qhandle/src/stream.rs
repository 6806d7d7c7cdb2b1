use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use quinn::{StreamId, VarInt};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time,
};

use crate::{Connection, Error, Result};

/// How long closing a stream waits for the peer to acknowledge the data still in flight.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// A bidirectional QUIC stream.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    writer: quinn::SendStream,
    reader: quinn::RecvStream,
}

impl Stream {
    pub(crate) fn new(writer: quinn::SendStream, reader: quinn::RecvStream) -> Self {
        Self {
            id: writer.id(),
            writer,
            reader,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Read up to `buf.len()` bytes, `Ok(0)` once the peer finished the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf).await?.unwrap_or(0))
    }

    /// Write the whole buffer, waiting for flow control credit as needed.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await?;
        Ok(())
    }

    /// Finish the sending side, the peer reads to the end and then sees end of stream.
    pub fn finish(&mut self) -> Result<()> {
        self.writer.finish()?;
        Ok(())
    }

    /// Abandon the sending side with an application error code.
    pub fn reset(&mut self, code: u32) -> Result<()> {
        self.writer.reset(VarInt::from_u32(code))?;
        Ok(())
    }

    /// Ask the peer to stop sending, with an application error code.
    pub fn stop(&mut self, code: u32) -> Result<()> {
        self.reader.stop(VarInt::from_u32(code))?;
        Ok(())
    }

    /// Finish the sending side and wait, for a short while, for the peer to acknowledge it.
    pub(crate) async fn finish_and_linger(&mut self) {
        if self.writer.finish().is_err() {
            // finished or reset before
            return;
        }
        match time::timeout(CLOSE_LINGER, self.writer.stopped()).await {
            Ok(Ok(None)) => {}
            Ok(Ok(Some(code))) => tracing::debug!(sid = %self.id, %code, "peer stopped the stream"),
            Ok(Err(error)) => tracing::debug!(sid = %self.id, %error, "stream lost while closing"),
            Err(_elapsed) => tracing::debug!(sid = %self.id, "peer did not acknowledge stream end"),
        }
    }

    pub fn split(self) -> (quinn::SendStream, quinn::RecvStream) {
        (self.writer, self.reader)
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.get_mut().reader), cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.get_mut().writer), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.get_mut().writer), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.get_mut().writer), cx)
    }
}

async fn within<T>(timeout: Option<Duration>, task: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout {
        None => task.await,
        Some(timeout) => time::timeout(timeout, task)
            .await
            .map_err(|_elapsed| Error::Timeout(timeout))?,
    }
}

/// A connection together with the one stream it carries.
///
/// This is the shape a dialer returns and a listener accepts: callers read and write bytes,
/// the connection is an implementation detail that [`StreamConn::close`] tears down with the
/// stream.
#[derive(Debug)]
pub struct StreamConn {
    connection: Connection,
    stream: Stream,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl StreamConn {
    pub fn new(connection: Connection, stream: Stream) -> Self {
        Self {
            connection,
            stream,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Read up to `buf.len()` bytes, `Ok(0)` at end of stream.
    ///
    /// Fails with [`Error::Timeout`] when a read timeout is set and no data arrived in time.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        within(self.read_timeout, self.stream.read(buf)).await
    }

    /// Write the whole buffer.
    ///
    /// Fails with [`Error::Timeout`] when a write timeout is set and the peer did not grant enough
    /// flow control credit in time; part of the data may have been sent.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        within(self.write_timeout, self.stream.write_all(data)).await
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.connection.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }

    /// Close the stream, then the connection.
    ///
    /// Fails if the connection had already broken down (idle timeout, reset, transport error);
    /// the resources are released either way.
    pub async fn close(mut self) -> Result<()> {
        let broken = self
            .connection
            .inner()
            .close_reason()
            .filter(|reason| !is_orderly(reason));

        self.stream.finish_and_linger().await;
        self.connection.close(0, "closed");
        tracing::info!(remote = %self.connection.remote_addr(), "stream connection closed");

        match broken {
            Some(reason) => Err(Error::Connection(reason)),
            None => Ok(()),
        }
    }

    pub fn into_parts(self) -> (Connection, Stream) {
        (self.connection, self.stream)
    }
}

fn is_orderly(reason: &quinn::ConnectionError) -> bool {
    matches!(
        reason,
        quinn::ConnectionError::ApplicationClosed(_)
            | quinn::ConnectionError::ConnectionClosed(_)
            | quinn::ConnectionError::LocallyClosed
    )
}

impl AsyncRead for StreamConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for StreamConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
