use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use quinn::{Endpoint, crypto::rustls::QuicClientConfig};
use rustls::{ClientConfig as TlsClientConfig, RootCertStore};
use tracing::{Instrument, trace_span};

use crate::{
    Connection, Error, Result, StreamConn, ToCertificate, crypto_provider,
    param::ClientParameters, verifier::SkipServerVerification,
};

/// A quic client that initiates connections to servers.
pub struct QuicClient {
    bind_endpoint: Option<Endpoint>,
    config: quinn::ClientConfig,
    parameters: ClientParameters,
}

impl QuicClient {
    /// Start to build a QuicClient.
    ///
    /// # Examples
    /// ```
    /// use qhandle::QuicClient;
    ///
    /// let client = QuicClient::builder()
    ///     .insecure_skip_verify()
    ///     .with_alpns(["echo"])
    ///     .build()
    ///     .expect("valid client configuration");
    /// ```
    pub fn builder() -> QuicClientBuilder {
        QuicClientBuilder {
            roots: RootCertStore::empty(),
            insecure: false,
            parameters: ClientParameters::default(),
            keylog: false,
            bind: None,
        }
    }

    pub fn parameters(&self) -> &ClientParameters {
        &self.parameters
    }

    // without a bound endpoint, every connection gets its own socket on an ephemeral port
    fn endpoint_for(&self, server_addr: SocketAddr) -> Result<Endpoint> {
        if let Some(endpoint) = &self.bind_endpoint {
            let local_addr = endpoint.local_addr()?;
            if local_addr.is_ipv4() != server_addr.is_ipv4() {
                return Err(Error::invalid_address(
                    server_addr.to_string(),
                    format!("address family does not match the bound address {local_addr}"),
                ));
            }
            return Ok(endpoint.clone());
        }

        let unspecified = match server_addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Ok(Endpoint::client(SocketAddr::new(unspecified, 0))?)
    }

    /// Connect to `server_addr`, presenting `server_name` in the `ClientHello`.
    ///
    /// Returns once the handshake completed.
    pub async fn connect_addr(&self, server_name: &str, server_addr: SocketAddr) -> Result<Connection> {
        async {
            let endpoint = self.endpoint_for(server_addr)?;
            let connecting = endpoint.connect_with(self.config.clone(), server_addr, server_name)?;
            let connection = connecting.await?;
            tracing::info!(local = ?endpoint.local_addr().ok(), "connected");
            Result::<_, Error>::Ok(Connection::new(connection, endpoint))
        }
        .instrument(trace_span!("connect", %server_name, %server_addr))
        .await
    }

    /// Resolve `host` and connect to the first of its addresses that accepts the connection.
    ///
    /// If every address fails, the error of the last attempt is returned.
    pub async fn connect(&self, host: &str, port: u16) -> Result<Connection> {
        let addrs = lookup(host, port).await?;
        let mut last_error = None;
        for server_addr in addrs {
            match self.connect_addr(host, server_addr).await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    tracing::debug!(%host, %server_addr, %error, "connect attempt failed");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::NoAddress(host.to_owned())))
    }

    /// Connect to `authority` (`host:port`) and open the stream the returned [`StreamConn`]
    /// reads and writes.
    pub async fn dial(&self, authority: &str) -> Result<StreamConn> {
        let (host, port) = split_host_port(authority)?;
        let connection = self.connect(host, port).await?;
        match connection.open_stream().await {
            Ok(stream) => Ok(StreamConn::new(connection, stream)),
            Err(error) => {
                connection.close(0, "failed to open stream");
                Err(error)
            }
        }
    }
}

/// Split `host:port`, where an ipv6 host is written in brackets: `[::1]:4433`.
pub(crate) fn split_host_port(authority: &str) -> Result<(&str, u16)> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::invalid_address(authority, "missing port"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|host| host.strip_suffix(']'))
        .unwrap_or(host);
    let port = port
        .parse::<u16>()
        .map_err(|e| Error::invalid_address(authority, format!("invalid port: {e}")))?;
    Ok((host, port))
}

pub(crate) async fn lookup(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if host.is_empty() {
        return Err(Error::invalid_address(host, "empty host"));
    }
    if port == 0 {
        return Err(Error::invalid_address(format!("{host}:{port}"), "port 0"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs = tokio::net::lookup_host((host, port))
        .await?
        .collect::<Vec<_>>();
    tracing::debug!(%host, ?addrs, "dns lookup");
    if addrs.is_empty() {
        return Err(Error::NoAddress(host.to_owned()));
    }
    Ok(addrs)
}

/// A builder for [`QuicClient`].
pub struct QuicClientBuilder {
    roots: RootCertStore,
    insecure: bool,
    parameters: ClientParameters,
    keylog: bool,
    bind: Option<SocketAddr>,
}

impl QuicClientBuilder {
    /// Verify servers against the given root store, replacing any roots added before.
    pub fn with_root_certificates(mut self, roots: RootCertStore) -> Self {
        self.roots = roots;
        self
    }

    /// Trust the given certificates, for example a pem file of a private CA or of a self-signed
    /// server certificate.
    pub fn add_root_certs(mut self, certs: impl ToCertificate) -> Result<Self> {
        for cert in certs.to_certificate()? {
            self.roots.add(cert)?;
        }
        Ok(self)
    }

    /// Trust the certificates of the platform's native store.
    ///
    /// Certificates that cannot be loaded or parsed are skipped.
    pub fn with_native_roots(mut self) -> Self {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!(%error, "failed to load native certificate");
        }
        let (added, ignored) = self.roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "loaded native root certificates");
        self
    }

    /// Accept any server certificate.
    ///
    /// The server is not authenticated, use this only for tests or on a trusted network.
    pub fn insecure_skip_verify(mut self) -> Self {
        self.insecure = true;
        self
    }

    /// Specify the parameters for every connection.
    ///
    /// If you call this multiple times, only the last `parameters` will be used.
    pub fn with_parameters(mut self, parameters: ClientParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add [alpn-protocol-ids] to send in the `ClientHello`, after those of the parameters.
    ///
    /// [alpn-protocol-ids](https://www.iana.org/assignments/tls-extensiontype-values/tls-extensiontype-values.xhtml#alpn-protocol-ids)
    pub fn with_alpns(mut self, alpns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.parameters
            .common
            .alpns
            .extend(alpns.into_iter().map(Into::into));
        self
    }

    /// Log TLS secrets to the file that the `SSLKEYLOGFILE` environment variable points to.
    pub fn enable_sslkeylog(mut self) -> Self {
        self.keylog = true;
        self
    }

    /// Share one socket bound on `addr` between all connections.
    ///
    /// The socket is bound by [`Self::build`], which must then run inside a tokio runtime.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = Some(addr);
        self
    }

    /// Build the QuicClient, ready to initiate connections to servers.
    pub fn build(self) -> Result<QuicClient> {
        let provider = crypto_provider();
        let tls_builder = TlsClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?;
        let mut tls_config = if self.insecure {
            tls_builder
                .dangerous()
                .with_custom_certificate_verifier(SkipServerVerification::new(provider))
                .with_no_client_auth()
        } else {
            tls_builder
                .with_root_certificates(self.roots)
                .with_no_client_auth()
        };
        tls_config.alpn_protocols = self.parameters.alpn_protocols();
        if self.keylog {
            tls_config.key_log = Arc::new(rustls::KeyLogFile::new());
        }

        let mut config = quinn::ClientConfig::new(Arc::new(QuicClientConfig::try_from(tls_config)?));
        config.transport_config(self.parameters.transport_config()?);

        let bind_endpoint = self.bind.map(Endpoint::client).transpose()?;
        if let Some(endpoint) = &bind_endpoint {
            tracing::info!(local = ?endpoint.local_addr().ok(), "client bound");
        }

        Ok(QuicClient {
            bind_endpoint,
            config,
            parameters: self.parameters,
        })
    }
}
