use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

/// Coarse classification of an [`Error`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// The handle is in the wrong state for the operation.
    State,
    /// The caller passed an address that cannot be used.
    Address,
    /// Establishing or running the QUIC connection failed.
    Transport,
    /// A stream or datagram operation failed.
    Stream,
    /// A deadline elapsed.
    Timeout,
    /// TLS or certificate material is unusable.
    Crypto,
    /// Parameters are out of range.
    Config,
    /// Local I/O failed.
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("handle is not connected")]
    NotConnected,
    #[error("handle is already connected to {0}")]
    AlreadyConnected(SocketAddr),
    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("dns lookup for `{0}` found no address")]
    NoAddress(String),
    #[error("failed to start connecting: {0}")]
    Connect(#[from] quinn::ConnectError),
    #[error("connection lost: {0}")]
    Connection(#[from] quinn::ConnectionError),
    #[error("stream write failed: {0}")]
    Write(#[from] quinn::WriteError),
    #[error("stream read failed: {0}")]
    Read(#[from] quinn::ReadError),
    #[error("stream already closed")]
    ClosedStream(#[from] quinn::ClosedStream),
    #[error("datagram send failed: {0}")]
    Datagram(#[from] quinn::SendDatagramError),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("listener closed")]
    ListenerClosed,
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
    #[error("tls config offers no cipher suite usable for QUIC initial packets")]
    NoInitialCipherSuite(#[from] quinn::crypto::rustls::NoInitialCipherSuite),
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("invalid parameters: {0}")]
    Parameters(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotConnected | Error::AlreadyConnected(_) | Error::ListenerClosed => {
                ErrorKind::State
            }
            Error::InvalidAddress { .. } | Error::NoAddress(_) => ErrorKind::Address,
            Error::Connect(_) | Error::Connection(_) => ErrorKind::Transport,
            Error::Write(_) | Error::Read(_) | Error::ClosedStream(_) | Error::Datagram(_) => {
                ErrorKind::Stream
            }
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Tls(_) | Error::NoInitialCipherSuite(_) | Error::Certificate(_) => {
                ErrorKind::Crypto
            }
            Error::Parameters(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// The status code reported for this error. Never zero, zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            Error::NotConnected => 1,
            Error::AlreadyConnected(_) => 2,
            Error::InvalidAddress { .. } => 3,
            Error::NoAddress(_) => 4,
            Error::Connect(_) => 5,
            Error::Connection(quinn::ConnectionError::TimedOut) => 7,
            Error::Connection(_) => 6,
            Error::Write(_) => 8,
            Error::Read(_) => 9,
            Error::ClosedStream(_) => 10,
            Error::Datagram(_) => 11,
            Error::Timeout(_) => 12,
            Error::ListenerClosed => 13,
            Error::Tls(_) => 14,
            Error::NoInitialCipherSuite(_) => 15,
            Error::Certificate(_) => 16,
            Error::Parameters(_) => 17,
            Error::Io(_) => 18,
        }
    }

    pub(crate) fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

/// Collapse a result into the status code convention: 0 for success, the error code otherwise.
pub fn code_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(error) => error.code(),
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Io(io_error) => io_error.kind(),
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::AlreadyConnected(_) => io::ErrorKind::AlreadyExists,
            Error::InvalidAddress { .. } | Error::Parameters(_) => io::ErrorKind::InvalidInput,
            Error::NoAddress(_) => io::ErrorKind::AddrNotAvailable,
            Error::Timeout(_) | Error::Connection(quinn::ConnectionError::TimedOut) => {
                io::ErrorKind::TimedOut
            }
            Error::Connection(_) | Error::ListenerClosed => io::ErrorKind::ConnectionAborted,
            Error::Write(_) | Error::ClosedStream(_) => io::ErrorKind::BrokenPipe,
            Error::Read(_) => io::ErrorKind::ConnectionReset,
            _ => io::ErrorKind::Other,
        };
        match error {
            Error::Io(io_error) => io_error,
            error => io::Error::new(kind, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn samples() -> Vec<Error> {
        vec![
            Error::NotConnected,
            Error::AlreadyConnected("127.0.0.1:4433".parse().unwrap()),
            Error::invalid_address("", "empty host"),
            Error::NoAddress("nowhere.invalid".into()),
            Error::Connect(quinn::ConnectError::EndpointStopping),
            Error::Connection(quinn::ConnectionError::LocallyClosed),
            Error::Connection(quinn::ConnectionError::TimedOut),
            Error::Write(quinn::WriteError::ClosedStream),
            Error::Read(quinn::ReadError::ClosedStream),
            Error::Datagram(quinn::SendDatagramError::Disabled),
            Error::Timeout(Duration::from_millis(10)),
            Error::ListenerClosed,
            Error::Tls(rustls::Error::General("bad".into())),
            Error::Parameters("idle timeout too large".into()),
            Error::Io(io::Error::other("disk")),
        ]
    }

    #[test]
    fn codes_are_nonzero_and_distinct() {
        let samples = samples();
        let codes = samples.iter().map(Error::code).collect::<HashSet<_>>();
        assert!(!codes.contains(&0));
        assert_eq!(codes.len(), samples.len());
    }

    #[test]
    fn code_of_success_is_zero() {
        assert_eq!(code_of(&Ok::<_, Error>(())), 0);
        assert_eq!(code_of::<()>(&Err(Error::NotConnected)), 1);
    }

    #[test]
    fn io_conversion_keeps_meaning() {
        let io_error = io::Error::from(Error::NotConnected);
        assert_eq!(io_error.kind(), io::ErrorKind::NotConnected);

        let io_error = io::Error::from(Error::Timeout(Duration::from_secs(1)));
        assert_eq!(io_error.kind(), io::ErrorKind::TimedOut);

        let inner = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let io_error = io::Error::from(Error::Io(inner));
        assert_eq!(io_error.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn kinds() {
        assert_eq!(Error::ListenerClosed.kind(), ErrorKind::State);
        assert_eq!(
            Error::Connection(quinn::ConnectionError::Reset).kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::Parameters(String::new()).kind(), ErrorKind::Config);
    }
}
