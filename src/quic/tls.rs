// SPDX-License-Identifier: MPL-2.0

//! rustls client configuration for the QUIC handshake.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use tracing::{debug, warn};

use super::{QuicConfig, TransportError};

/// Well-known bundle locations checked after `SSL_CERT_FILE`/`SSL_CERT_DIR`.
const SYSTEM_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
    "/usr/local/etc/openssl/cert.pem",
];

/// ⚠️ DANGEROUS: A certificate verifier that accepts all certificates without validation.
/// This should ONLY be used for testing and development!
#[derive(Debug)]
struct InsecureServerCertVerifier(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Which source supplied the trust anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrustSource {
    CustomRoots,
    CaFile(PathBuf),
    CaDir(PathBuf),
    System(PathBuf),
    Native,
}

fn certs_from_file(path: &Path) -> Vec<CertificateDer<'static>> {
    match CertificateDer::pem_file_iter(path) {
        Ok(iter) => iter.filter_map(Result::ok).collect(),
        Err(e) => {
            debug!(path = %path.display(), error = ?e, "could not read CA file");
            Vec::new()
        }
    }
}

fn certs_from_dir(dir: &Path) -> Vec<CertificateDer<'static>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "could not read CA directory");
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    paths.iter().flat_map(|p| certs_from_file(p)).collect()
}

fn add_all(store: &mut RootCertStore, certs: Vec<CertificateDer<'static>>) -> usize {
    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        debug!(added, ignored, "skipped unparsable trust anchors");
    }
    added
}

/// Fills `store` from the first source that yields at least one usable root:
/// in-memory roots, CA file, CA directory, system bundle paths, then the
/// platform store.
pub(crate) fn load_trust_anchors(
    cfg: &QuicConfig,
    store: &mut RootCertStore,
) -> Result<TrustSource, TransportError> {
    if let Some(roots) = &cfg.custom_root_certs {
        let certs = roots.iter().map(|der| CertificateDer::from(der.clone())).collect();
        if add_all(store, certs) > 0 {
            return Ok(TrustSource::CustomRoots);
        }
    }
    if let Some(file) = &cfg.ca_file {
        if add_all(store, certs_from_file(file)) > 0 {
            return Ok(TrustSource::CaFile(file.clone()));
        }
    }
    if let Some(dir) = &cfg.ca_dir {
        if add_all(store, certs_from_dir(dir)) > 0 {
            return Ok(TrustSource::CaDir(dir.clone()));
        }
    }

    let env_file = std::env::var_os("SSL_CERT_FILE").map(PathBuf::from);
    let env_dir = std::env::var_os("SSL_CERT_DIR").map(PathBuf::from);
    if let Some(file) = env_file {
        if add_all(store, certs_from_file(&file)) > 0 {
            return Ok(TrustSource::System(file));
        }
    }
    if let Some(dir) = env_dir {
        if add_all(store, certs_from_dir(&dir)) > 0 {
            return Ok(TrustSource::System(dir));
        }
    }
    for bundle in SYSTEM_BUNDLES {
        let path = Path::new(bundle);
        if path.is_file() && add_all(store, certs_from_file(path)) > 0 {
            return Ok(TrustSource::System(path.to_path_buf()));
        }
    }

    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!(error = %e, "error loading platform root certificates");
    }
    if add_all(store, native.certs) > 0 {
        return Ok(TrustSource::Native);
    }

    Err(TransportError::Configuration(
        "no trusted root certificates found; configure custom roots, a CA file or a CA directory"
            .to_string(),
    ))
}

/// Builds the TLS 1.3 client configuration with ALPN and optional client auth.
pub(crate) fn build_client_config(cfg: &QuicConfig) -> Result<RustlsClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = RustlsClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Configuration(format!("TLS protocol versions: {}", e)))?;

    let builder = if cfg.insecure_skip_verify {
        warn!("TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier(provider)))
    } else {
        let mut roots = RootCertStore::empty();
        let source = load_trust_anchors(cfg, &mut roots)?;
        debug!(?source, roots = roots.len(), "loaded trust anchors");
        builder.with_root_certificates(roots)
    };

    let mut tls = match (&cfg.client_cert_chain, &cfg.client_private_key) {
        (Some(chain), Some(key)) => {
            let chain: Vec<CertificateDer<'static>> =
                chain.iter().map(|c| CertificateDer::from(c.clone())).collect();
            let key = PrivateKeyDer::try_from(key.clone()).map_err(|e| {
                TransportError::Configuration(format!(
                    "failed to parse client private key DER for mTLS: {}",
                    e
                ))
            })?;
            builder.with_client_auth_cert(chain, key).map_err(|e| {
                TransportError::Configuration(format!(
                    "failed to build client TLS config with client cert: {}",
                    e
                ))
            })?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(TransportError::Configuration(
                "client certificate chain and private key must be set together".to_string(),
            ))
        }
    };

    tls.alpn_protocols = cfg.alpn_protocols.clone();
    Ok(tls)
}
