//! A small QUIC connection handle over [`quinn`].
//!
//! [`QuicHandle`] is the whole story for most callers: initialize it, connect it to a host and port,
//! send and receive bytes over one bidirectional stream, close it. The pieces it is built from are
//! public too: [`QuicClient`] dials, [`QuicListener`] accepts, [`Connection`] exposes streams and
//! datagrams, and [`StreamConn`] pairs a connection with its stream.
//!
//! # Examples
//! ```no_run
//! # async fn demo() -> qhandle::Result<()> {
//! use qhandle::QuicHandle;
//!
//! let mut handle = QuicHandle::init();
//! handle.connect("localhost", 4433).await?;
//! handle.send(b"ping").await?;
//!
//! let mut buf = [0u8; 1024];
//! let n = handle.receive(&mut buf).await?;
//! println!("received {:?}", &buf[..n]);
//!
//! handle.close().await?;
//! # Ok(())
//! # }
//! ```
use std::sync::{Arc, LazyLock};

use rustls::crypto::CryptoProvider;

pub use crate::{
    cert::{SelfSigned, ToCertificate, ToPrivateKey},
    client::{QuicClient, QuicClientBuilder},
    conn::Connection,
    error::{Error, ErrorKind, Result, code_of},
    handle::QuicHandle,
    param::{ClientParameters, CommonParameters, DEFAULT_ALPN, ServerParameters, handy},
    server::{QuicListener, QuicListenerBuilder},
    stream::{Stream, StreamConn},
};

pub mod blocking;
mod cert;
mod client;
mod conn;
mod error;
mod handle;
mod param;
mod server;
mod stream;
pub mod verifier;

pub use quinn;
pub use rustls;

static CRYPTO_PROVIDER: LazyLock<Arc<CryptoProvider>> =
    LazyLock::new(|| Arc::new(rustls::crypto::ring::default_provider()));

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    CRYPTO_PROVIDER.clone()
}
