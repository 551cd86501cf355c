// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::time::Duration;

use quinn_proto::{IdleTimeout, MtuDiscoveryConfig, TransportConfig, VarInt};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use super::TransportError;

/// ALPN tag advertised for MQTT over QUIC.
pub const DEFAULT_ALPN: &[u8] = b"mqtt";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Upper bound for the idle timeout, which also bounds the handshake.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest UDP payload the connection will emit.
pub const MAX_UDP_PAYLOAD: u16 = 1452;

/// QUIC connection configuration exposed to the caller.
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// ALPN protocols to advertise (raw bytes), e.g. b"mqtt"
    pub alpn_protocols: Vec<Vec<u8>>,
    /// SNI / certificate name; defaults to the host passed to `connect`.
    pub server_name: Option<String>,
    /// Trusted roots as DER, tried before any file or system source.
    pub custom_root_certs: Option<Vec<Vec<u8>>>,
    /// PEM bundle with trusted roots.
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM files with trusted roots.
    pub ca_dir: Option<PathBuf>,
    /// Optional client certificate chain for mutual TLS (DER bytes)
    pub client_cert_chain: Option<Vec<Vec<u8>>>,
    /// Optional client private key for mutual TLS (DER bytes)
    pub client_private_key: Option<Vec<u8>>,
    /// ⚠️ DANGEROUS: Skip TLS certificate verification (for testing only!)
    pub insecure_skip_verify: bool,
    /// How long `connect` blocks waiting for the handshake.
    pub connect_timeout: Duration,
    /// QUIC idle timeout, capped at [`MAX_IDLE_TIMEOUT`].
    pub idle_timeout: Duration,
    pub keep_alive_interval: Option<Duration>,
    pub stream_receive_window: u32,
    pub connection_receive_window: u32,
    pub send_window: u64,
    pub max_concurrent_bidi_streams: u32,
    pub max_udp_payload_size: u16,
}

impl Default for QuicConfig {
    fn default() -> Self {
        QuicConfig::builder().build()
    }
}

impl QuicConfig {
    /// Create a new builder for `QuicConfig`.
    pub fn builder() -> QuicConfigBuilder {
        QuicConfigBuilder {
            alpn_protocols: Vec::new(),
            server_name: None,
            custom_root_certs: None,
            ca_file: None,
            ca_dir: None,
            client_cert_chain: None,
            client_private_key: None,
            insecure_skip_verify: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: MAX_IDLE_TIMEOUT,
            keep_alive_interval: None,
            stream_receive_window: 1024 * 1024,
            connection_receive_window: 4 * 1024 * 1024,
            send_window: 4 * 1024 * 1024,
            max_concurrent_bidi_streams: 16,
            max_udp_payload_size: MAX_UDP_PAYLOAD,
        }
    }

    /// Transport parameters handed to `quinn-proto`.
    pub(crate) fn transport_config(&self) -> Result<TransportConfig, TransportError> {
        let idle = IdleTimeout::try_from(self.idle_timeout.min(MAX_IDLE_TIMEOUT))
            .map_err(|_| TransportError::Configuration("idle timeout out of range".to_string()))?;

        let mut mtu = MtuDiscoveryConfig::default();
        mtu.upper_bound(self.max_udp_payload_size);

        let mut cfg = TransportConfig::default();
        cfg.max_concurrent_bidi_streams(VarInt::from_u32(self.max_concurrent_bidi_streams))
            .stream_receive_window(VarInt::from_u32(self.stream_receive_window))
            .receive_window(VarInt::from_u32(self.connection_receive_window))
            .send_window(self.send_window)
            .max_idle_timeout(Some(idle))
            .keep_alive_interval(self.keep_alive_interval)
            .initial_mtu(1200.min(self.max_udp_payload_size))
            .mtu_discovery_config(Some(mtu));
        Ok(cfg)
    }
}

/// Builder for `QuicConfig` to simplify ergonomic construction.
pub struct QuicConfigBuilder {
    alpn_protocols: Vec<Vec<u8>>,
    server_name: Option<String>,
    custom_root_certs: Option<Vec<Vec<u8>>>,
    ca_file: Option<PathBuf>,
    ca_dir: Option<PathBuf>,
    client_cert_chain: Option<Vec<Vec<u8>>>,
    client_private_key: Option<Vec<u8>>,
    insecure_skip_verify: bool,
    connect_timeout: Duration,
    idle_timeout: Duration,
    keep_alive_interval: Option<Duration>,
    stream_receive_window: u32,
    connection_receive_window: u32,
    send_window: u64,
    max_concurrent_bidi_streams: u32,
    max_udp_payload_size: u16,
}

fn pem_certs(iter: impl Iterator<Item = Result<CertificateDer<'static>, rustls_pki_types::pem::Error>>) -> Vec<Vec<u8>> {
    iter.filter_map(|r| r.ok().map(|c| c.as_ref().to_vec()))
        .collect()
}

impl QuicConfigBuilder {
    /// Add a single ALPN protocol (as bytes) to advertise.
    pub fn alpn(mut self, proto: impl AsRef<[u8]>) -> Self {
        self.alpn_protocols.push(proto.as_ref().to_vec());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Provide custom root certificates as DER-encoded bytes
    pub fn custom_roots(mut self, roots: Vec<Vec<u8>>) -> Self {
        self.custom_root_certs = Some(roots);
        self
    }

    /// Load custom root certificates from PEM data (may contain multiple CERTIFICATE sections).
    pub fn custom_roots_from_pem(mut self, pem_data: &[u8]) -> Result<Self, TransportError> {
        let roots = pem_certs(CertificateDer::pem_slice_iter(pem_data));
        if roots.is_empty() {
            return Err(TransportError::Configuration(
                "no valid certificates found in PEM data".to_string(),
            ));
        }
        self.custom_root_certs = Some(roots);
        Ok(self)
    }

    /// PEM bundle consulted when no in-memory roots are given.
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Directory of PEM files consulted after `ca_file`.
    pub fn ca_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_dir = Some(path.into());
        self
    }

    /// Provide a client certificate chain for mutual TLS as DER-encoded bytes
    pub fn client_cert_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.client_cert_chain = Some(chain);
        self
    }

    /// Load a client certificate chain from PEM data.
    pub fn client_cert_chain_from_pem(mut self, pem_data: &[u8]) -> Result<Self, TransportError> {
        let chain = pem_certs(CertificateDer::pem_slice_iter(pem_data));
        if chain.is_empty() {
            return Err(TransportError::Configuration(
                "no valid certificates found in PEM data".to_string(),
            ));
        }
        self.client_cert_chain = Some(chain);
        Ok(self)
    }

    /// Provide a client private key for mutual TLS (DER-encoded bytes)
    pub fn client_private_key(mut self, key: Vec<u8>) -> Self {
        self.client_private_key = Some(key);
        self
    }

    /// Load a client private key from PEM data (first private-key section).
    pub fn client_private_key_from_pem(mut self, pem_data: &[u8]) -> Result<Self, TransportError> {
        let key = PrivateKeyDer::from_pem_slice(pem_data).map_err(|e| {
            TransportError::Configuration(format!(
                "failed to parse client private key from PEM data: {:?}",
                e
            ))
        })?;
        self.client_private_key = Some(key.secret_der().to_vec());
        Ok(self)
    }

    /// ⚠️ DANGEROUS: Skip TLS certificate verification.
    /// This disables all certificate validation and should ONLY be used for testing!
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Values above 10 s are capped.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout.min(MAX_IDLE_TIMEOUT);
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    pub fn stream_receive_window(mut self, bytes: u32) -> Self {
        self.stream_receive_window = bytes;
        self
    }

    pub fn connection_receive_window(mut self, bytes: u32) -> Self {
        self.connection_receive_window = bytes;
        self
    }

    pub fn send_window(mut self, bytes: u64) -> Self {
        self.send_window = bytes;
        self
    }

    pub fn max_concurrent_bidi_streams(mut self, n: u32) -> Self {
        self.max_concurrent_bidi_streams = n;
        self
    }

    /// Clamped to 1200..=1452, the range QUIC allows and the path is assumed to carry.
    pub fn max_udp_payload_size(mut self, size: u16) -> Self {
        self.max_udp_payload_size = size.clamp(1200, MAX_UDP_PAYLOAD);
        self
    }

    /// Finalize the builder into a `QuicConfig`.
    pub fn build(self) -> QuicConfig {
        let alpn_protocols = if self.alpn_protocols.is_empty() {
            vec![DEFAULT_ALPN.to_vec()]
        } else {
            self.alpn_protocols
        };
        QuicConfig {
            alpn_protocols,
            server_name: self.server_name,
            custom_root_certs: self.custom_root_certs,
            ca_file: self.ca_file,
            ca_dir: self.ca_dir,
            client_cert_chain: self.client_cert_chain,
            client_private_key: self.client_private_key,
            insecure_skip_verify: self.insecure_skip_verify,
            connect_timeout: self.connect_timeout,
            idle_timeout: self.idle_timeout,
            keep_alive_interval: self.keep_alive_interval,
            stream_receive_window: self.stream_receive_window,
            connection_receive_window: self.connection_receive_window,
            send_window: self.send_window,
            max_concurrent_bidi_streams: self.max_concurrent_bidi_streams,
            max_udp_payload_size: self.max_udp_payload_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = QuicConfig::default();
        assert_eq!(cfg.alpn_protocols, vec![b"mqtt".to_vec()]);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(15));
        assert_eq!(cfg.max_udp_payload_size, 1452);
        assert!(!cfg.insecure_skip_verify);
        assert!(cfg.transport_config().is_ok());
    }

    #[test]
    fn test_caps() {
        let cfg = QuicConfig::builder()
            .idle_timeout(Duration::from_secs(60))
            .max_udp_payload_size(9000)
            .alpn("mqtt-test")
            .build();
        assert_eq!(cfg.idle_timeout, MAX_IDLE_TIMEOUT);
        assert_eq!(cfg.max_udp_payload_size, 1452);
        assert_eq!(cfg.alpn_protocols, vec![b"mqtt-test".to_vec()]);
    }

    #[test]
    fn test_pem_without_certificates() {
        let res = QuicConfig::builder().custom_roots_from_pem(b"not a pem");
        assert!(matches!(res, Err(TransportError::Configuration(_))));
    }
}
