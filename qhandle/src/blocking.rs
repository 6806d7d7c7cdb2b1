//! Synchronous calls over [`QuicHandle`], for callers without an async runtime.
//!
//! Every call returns a [`Result`](crate::Result); [`Error::code`](crate::Error::code) maps a
//! failure to a non-zero status code when it has to cross a C boundary.
use std::{net::SocketAddr, sync::Arc};

use tokio::runtime::{self, Runtime};

use crate::{QuicClient, QuicHandle, Result};

/// A [`QuicHandle`] that owns the runtime driving it.
///
/// One worker thread keeps driving the connection between calls, so keep-alives and
/// acknowledgements go out while the caller is busy elsewhere.
///
/// Must not be created or used from within an async context.
pub struct BlockingHandle {
    runtime: Runtime,
    handle: QuicHandle,
}

impl BlockingHandle {
    /// An empty handle, see [`QuicHandle::init`].
    pub fn init() -> Result<Self> {
        Self::with_handle(QuicHandle::init())
    }

    /// An empty handle that connects with `client`, see [`QuicHandle::with_client`].
    pub fn with_client(client: Arc<QuicClient>) -> Result<Self> {
        Self::with_handle(QuicHandle::with_client(client))
    }

    fn with_handle(handle: QuicHandle) -> Result<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("qhandle-blocking")
            .enable_all()
            .build()?;
        Ok(Self { runtime, handle })
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.runtime.block_on(self.handle.connect(host, port))
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.runtime.block_on(self.handle.send(data))
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.runtime.block_on(self.handle.receive(buf))
    }

    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.handle.close())
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.handle.remote_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }
}

impl Drop for BlockingHandle {
    fn drop(&mut self) {
        if !self.handle.is_connected() {
            return;
        }
        // block_on panics inside another runtime, the handle's own drop still closes the
        // connection there
        if tokio::runtime::Handle::try_current().is_err()
            && let Err(error) = self.runtime.block_on(self.handle.close())
        {
            tracing::debug!(%error, "connection broke down before close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn init_without_runtime() {
        let mut handle = BlockingHandle::init().unwrap();
        assert!(!handle.is_connected());

        let error = handle.send(b"data").unwrap_err();
        assert!(matches!(error, Error::NotConnected));
        assert_ne!(error.code(), 0);
        assert!(handle.close().is_ok());
    }
}
