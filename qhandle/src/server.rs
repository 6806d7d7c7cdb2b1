use std::{net::SocketAddr, sync::Arc};

use quinn::{Endpoint, crypto::rustls::QuicServerConfig};
use rustls::{
    ServerConfig as TlsServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, trace_span};

use crate::{
    Connection, Error, Result, StreamConn, ToCertificate, ToPrivateKey, crypto_provider,
    param::ServerParameters,
};

/// Application error code sent to clients refused because the backlog is full.
const CONNECTION_REFUSED: u32 = 0x02;

/// A quic listener that accepts incoming connections.
///
/// To create a listener, configure a [`QuicListenerBuilder`] and call [`QuicListenerBuilder::listen`].
///
/// The listener only hands out connections, it does not manage them: a connection it accepted
/// lives on after the listener is closed.
#[derive(Debug)]
pub struct QuicListener {
    endpoint: Endpoint,
    incomings: Mutex<mpsc::Receiver<Connection>>,
    accept_task: JoinHandle<()>,
    closed: watch::Sender<bool>,
}

impl QuicListener {
    /// Start to build a QuicListener.
    pub fn builder() -> QuicListenerBuilder {
        QuicListenerBuilder {
            parameters: ServerParameters::default(),
            identity: None,
            keylog: false,
        }
    }

    /// The address the listener is bound to, with the actual port if port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accept the next incoming connection that completed its handshake.
    ///
    /// Fails with [`Error::ListenerClosed`] once the listener is closed.
    pub async fn accept(&self) -> Result<Connection> {
        let mut closed = self.closed.subscribe();
        let mut incomings = tokio::select! {
            biased;
            _ = until_closed(&mut closed) => return Err(Error::ListenerClosed),
            incomings = self.incomings.lock() => incomings,
        };
        tokio::select! {
            biased;
            _ = until_closed(&mut closed) => {
                refuse_queued(&mut incomings);
                Err(Error::ListenerClosed)
            }
            connection = incomings.recv() => connection.ok_or(Error::ListenerClosed),
        }
    }

    /// Accept the next incoming connection and the first stream its peer starts.
    pub async fn accept_stream_conn(&self) -> Result<StreamConn> {
        let connection = self.accept().await?;
        match connection.accept_stream().await {
            Ok(stream) => Ok(StreamConn::new(connection, stream)),
            Err(error) => {
                tracing::debug!(remote = %connection.remote_addr(), %error, "no stream started");
                connection.close(0, "no stream started");
                Err(error)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Stop accepting connections.
    ///
    /// New clients are refused, connections accepted before keep running and the socket is
    /// released with the last of them. Closing more than once has no further effect.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        self.accept_task.abort();
        self.endpoint.set_server_config(None);
        // a pending accept holding the queue refuses it instead
        if let Ok(mut incomings) = self.incomings.try_lock() {
            refuse_queued(&mut incomings);
        }
        tracing::info!(local = ?self.endpoint.local_addr().ok(), "listener closed");
    }
}

impl Drop for QuicListener {
    fn drop(&mut self) {
        self.close();
    }
}

async fn until_closed(closed: &mut watch::Receiver<bool>) {
    _ = closed.wait_for(|closed| *closed).await;
}

// connections still handshaking find the queue closed and refuse themselves
fn refuse_queued(incomings: &mut mpsc::Receiver<Connection>) {
    incomings.close();
    while let Ok(connection) = incomings.try_recv() {
        connection.close(CONNECTION_REFUSED, "listener closed");
    }
}

async fn accept_loop(endpoint: Endpoint, incomings: mpsc::Sender<Connection>) {
    while let Some(incoming) = endpoint.accept().await {
        let remote = incoming.remote_address();
        let endpoint = endpoint.clone();
        let incomings = incomings.clone();
        tokio::spawn(
            async move {
                let connection = match incoming.await {
                    Ok(connection) => connection,
                    Err(error) => {
                        tracing::warn!(%error, "handshake failed");
                        return;
                    }
                };
                tracing::info!("accepted new connection");
                match incomings.try_send(Connection::new(connection, endpoint)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(connection)) => {
                        tracing::warn!("backlog is full, connection refused");
                        connection.close(CONNECTION_REFUSED, "backlog full");
                    }
                    Err(mpsc::error::TrySendError::Closed(connection)) => {
                        connection.close(CONNECTION_REFUSED, "listener closed");
                    }
                }
            }
            .instrument(trace_span!("accept", %remote)),
        );
    }
    tracing::debug!("endpoint stopped accepting");
}

/// A builder for [`QuicListener`].
pub struct QuicListenerBuilder {
    parameters: ServerParameters,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    keylog: bool,
}

impl QuicListenerBuilder {
    /// Specify the parameters for every accepted connection.
    pub fn with_parameters(mut self, parameters: ServerParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the certificate chain and its private key, as paths or bytes in pem or der.
    pub fn with_cert(
        mut self,
        cert_chain: impl ToCertificate,
        private_key: impl ToPrivateKey,
    ) -> Result<Self> {
        self.identity = Some((cert_chain.to_certificate()?, private_key.to_private_key()?));
        Ok(self)
    }

    /// Log TLS secrets to the file that the `SSLKEYLOGFILE` environment variable points to.
    pub fn enable_sslkeylog(mut self) -> Self {
        self.keylog = true;
        self
    }

    /// Bind `addr` and start accepting connections.
    ///
    /// At most `backlog` handshaked connections wait for [`QuicListener::accept`], further clients
    /// are refused. Must be called inside a tokio runtime.
    pub fn listen(self, addr: SocketAddr, backlog: usize) -> Result<QuicListener> {
        let (cert_chain, private_key) = self
            .identity
            .ok_or_else(|| Error::Parameters("a listener needs a certificate".to_owned()))?;

        let mut tls_config = TlsServerConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)?;
        tls_config.alpn_protocols = self.parameters.alpn_protocols();
        if self.keylog {
            tls_config.key_log = Arc::new(rustls::KeyLogFile::new());
        }

        let mut config =
            quinn::ServerConfig::with_crypto(Arc::new(QuicServerConfig::try_from(tls_config)?));
        config.transport_config(self.parameters.transport_config()?);

        let endpoint = Endpoint::server(config, addr)?;
        tracing::info!(local = ?endpoint.local_addr().ok(), backlog, "listening");

        let (sender, receiver) = mpsc::channel(backlog.max(1));
        let accept_task = tokio::spawn(accept_loop(endpoint.clone(), sender));

        Ok(QuicListener {
            endpoint,
            incomings: Mutex::new(receiver),
            accept_task,
            closed: watch::Sender::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelfSigned;

    #[tokio::test]
    async fn listen_requires_certificate() {
        let result = QuicListener::builder().listen("127.0.0.1:0".parse().unwrap(), 16);
        assert!(matches!(result, Err(Error::Parameters(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let signed = SelfSigned::generate("localhost").unwrap();
        let listener = QuicListener::builder()
            .with_cert(signed.cert_der(), signed.key_der())
            .unwrap()
            .listen("127.0.0.1:0".parse().unwrap(), 16)
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);

        listener.close();
        listener.close();
        assert!(listener.is_closed());
        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed)));
    }
}
