use std::{sync::Arc, time::Duration};

use quinn::{IdleTimeout, TransportConfig, VarInt};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The ALPN spoken by both ends unless configured otherwise.
pub const DEFAULT_ALPN: &str = "gt-quic";

/// Parameters shared by both ends of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonParameters {
    /// Idle timeout in milliseconds, `0` disables it.
    pub idle_timeout_ms: u64,
    /// Interval of keep-alive pings in milliseconds, `0` disables them.
    pub keep_alive_ms: u64,
    pub max_concurrent_bidi_streams: u32,
    pub max_concurrent_uni_streams: u32,
    pub enable_datagrams: bool,
    pub alpns: Vec<String>,
}

impl Default for CommonParameters {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 10_000,
            keep_alive_ms: 0,
            max_concurrent_bidi_streams: 100,
            max_concurrent_uni_streams: 100,
            enable_datagrams: true,
            alpns: vec![DEFAULT_ALPN.to_owned()],
        }
    }
}

impl CommonParameters {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms != 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_ms != 0).then(|| Duration::from_millis(self.keep_alive_ms))
    }

    pub(crate) fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        self.alpns.iter().map(|alpn| alpn.as_bytes().to_vec()).collect()
    }

    /// Check the values and build the transport config the connection will run with.
    pub fn transport_config(&self) -> Result<Arc<TransportConfig>> {
        if let (Some(idle), Some(keep_alive)) = (self.idle_timeout(), self.keep_alive()) {
            if keep_alive >= idle {
                return Err(Error::Parameters(format!(
                    "keep alive interval {keep_alive:?} must be shorter than idle timeout {idle:?}"
                )));
            }
        }

        let idle_timeout = self
            .idle_timeout()
            .map(IdleTimeout::try_from)
            .transpose()
            .map_err(|_| {
                Error::Parameters(format!("idle timeout {}ms is out of range", self.idle_timeout_ms))
            })?;

        let mut config = TransportConfig::default();
        config
            .max_idle_timeout(idle_timeout)
            .keep_alive_interval(self.keep_alive())
            .max_concurrent_bidi_streams(VarInt::from_u32(self.max_concurrent_bidi_streams))
            .max_concurrent_uni_streams(VarInt::from_u32(self.max_concurrent_uni_streams));
        if !self.enable_datagrams {
            config.datagram_receive_buffer_size(None);
        }
        Ok(Arc::new(config))
    }
}

// `0` means disabled, so a set duration rounds up to at least one millisecond
fn enabled_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

macro_rules! parameters {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            #[serde(flatten)]
            pub common: CommonParameters,
        }

        impl $name {
            /// Parse parameters from json, absent fields take their default values.
            pub fn from_json(json: &str) -> Result<Self> {
                serde_json::from_str(json).map_err(|e| Error::Parameters(e.to_string()))
            }

            pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
                self.common.idle_timeout_ms = timeout.map_or(0, enabled_millis);
                self
            }

            pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
                self.common.keep_alive_ms = interval.map_or(0, enabled_millis);
                self
            }

            pub fn with_max_streams(mut self, bidi: u32, uni: u32) -> Self {
                self.common.max_concurrent_bidi_streams = bidi;
                self.common.max_concurrent_uni_streams = uni;
                self
            }

            pub fn with_datagrams(mut self, enable: bool) -> Self {
                self.common.enable_datagrams = enable;
                self
            }

            /// Replace the alpn list.
            pub fn with_alpns(mut self, alpns: impl IntoIterator<Item = impl Into<String>>) -> Self {
                self.common.alpns = alpns.into_iter().map(Into::into).collect();
                self
            }
        }

        impl std::ops::Deref for $name {
            type Target = CommonParameters;

            fn deref(&self) -> &Self::Target {
                &self.common
            }
        }
    };
}

parameters!(
    /// Parameters a [`QuicClient`](crate::QuicClient) applies to every connection it initiates.
    ClientParameters
);
parameters!(
    /// Parameters a [`QuicListener`](crate::QuicListener) applies to every connection it accepts.
    ServerParameters
);

pub mod handy {
    use std::time::Duration;

    use super::{ClientParameters, ServerParameters};

    pub fn client_parameters() -> ClientParameters {
        ClientParameters::default()
            .with_idle_timeout(Some(Duration::from_secs(10)))
            .with_keep_alive(Some(Duration::from_secs(3)))
            .with_max_streams(100, 100)
    }

    pub fn server_parameters() -> ServerParameters {
        ServerParameters::default()
            .with_idle_timeout(Some(Duration::from_secs(10)))
            .with_max_streams(100, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = ClientParameters::default();
        assert_eq!(params.idle_timeout(), Some(Duration::from_millis(10_000)));
        assert_eq!(params.keep_alive(), None);
        assert!(params.enable_datagrams);
        assert_eq!(params.alpn_protocols(), vec![b"gt-quic".to_vec()]);
        assert!(params.transport_config().is_ok());
    }

    #[test]
    fn from_json_fills_defaults() {
        let params = ServerParameters::from_json(
            r#"{ "idle_timeout_ms": 30000, "alpns": ["echo"], "enable_datagrams": false }"#,
        )
        .unwrap();
        assert_eq!(params.idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(params.alpns, vec!["echo".to_owned()]);
        assert!(!params.enable_datagrams);
        assert_eq!(params.max_concurrent_bidi_streams, 100);
    }

    #[test]
    fn from_json_rejects_garbage() {
        let error = ClientParameters::from_json(r#"{ "idle_timeout_ms": "soon" }"#).unwrap_err();
        assert!(matches!(error, Error::Parameters(_)));
    }

    #[test]
    fn json_round_trip_is_flat() {
        let params = handy::client_parameters();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["keep_alive_ms"], 3000);
        assert_eq!(ClientParameters::from_json(&json.to_string()).unwrap(), params);
    }

    #[test]
    fn keep_alive_must_be_shorter_than_idle() {
        let params = ClientParameters::default()
            .with_idle_timeout(Some(Duration::from_secs(1)))
            .with_keep_alive(Some(Duration::from_secs(2)));
        assert!(matches!(params.transport_config(), Err(Error::Parameters(_))));

        let params = params.with_idle_timeout(None);
        assert!(params.transport_config().is_ok());
    }

    #[test]
    fn idle_timeout_out_of_range() {
        let mut params = ServerParameters::default();
        params.common.idle_timeout_ms = u64::MAX;
        assert!(matches!(params.transport_config(), Err(Error::Parameters(_))));
    }

    #[test]
    fn short_and_huge_durations_stay_enabled() {
        let params = handy::client_parameters()
            .with_idle_timeout(Some(Duration::from_micros(500)))
            .with_keep_alive(Some(Duration::from_nanos(1)));
        assert_eq!(params.idle_timeout(), Some(Duration::from_millis(1)));
        assert_eq!(params.keep_alive(), Some(Duration::from_millis(1)));

        let params = params.with_idle_timeout(Some(Duration::MAX));
        assert_eq!(params.idle_timeout_ms, u64::MAX);
        assert!(matches!(params.transport_config(), Err(Error::Parameters(_))));

        let params = params.with_idle_timeout(Some(Duration::ZERO));
        assert_eq!(params.idle_timeout(), Some(Duration::from_millis(1)));
        assert_eq!(params.with_idle_timeout(None).idle_timeout(), None);
    }
}
