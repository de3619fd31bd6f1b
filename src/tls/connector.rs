//! TLS connector for the two tunnel legs
//!
//! This module provides `TlsConnector`, which establishes TLS-encrypted
//! client connections for the relay and gateway legs of the tunnel. The
//! gateway leg nests its handshake inside the already-established relay
//! stream, so the connector works over any async byte stream, not just
//! `TcpStream`.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

use crate::tls::{build_root_store, parse_certificates, parse_private_key, TlsError};

/// ALPN protocol advertised on the gateway leg.
///
/// The gateway multiplexes several protocols behind one TLS endpoint; this
/// identifier selects PAM database tunneling.
pub const TUNNEL_ALPN: &[u8] = b"infisical-pam-proxy";

/// TLS connector for establishing client-side TLS connections
///
/// Wraps `tokio_rustls::TlsConnector` with in-memory certificate loading
/// and error handling. Two construction paths exist, one per tunnel leg.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create the connector for the relay leg.
    ///
    /// Strict configuration: trusted roots come from the relay server
    /// chain, the relay client certificate/key is presented for mutual TLS,
    /// and hostname verification stays on.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the PEM inputs cannot be parsed or the
    /// client certificate/key pair is rejected by rustls.
    pub fn for_relay(
        client_cert_pem: &str,
        client_key_pem: &str,
        server_chain_pem: &str,
    ) -> Result<Self, TlsError> {
        let root_store = build_root_store(Some(server_chain_pem))?;
        let certs = parse_certificates(client_cert_pem)?;
        let key = parse_private_key(client_key_pem)?;

        let provider = rustls::crypto::ring::default_provider();
        let config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
            .with_root_certificates(root_store)
            .with_client_auth_cert(certs, key)
            .map_err(|e| TlsError::config(format!("Failed to build client TLS config: {}", e)))?;

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }

    /// Create the connector for the gateway leg.
    ///
    /// The gateway terminates TLS behind the relay and is identified by
    /// ALPN plus the mutual-TLS client certificate, not by hostname, so
    /// certificate verification is disabled and the offered ALPN list is
    /// exactly [`TUNNEL_ALPN`].
    pub fn for_gateway(
        client_cert_pem: &str,
        client_key_pem: &str,
        _server_chain_pem: &str,
    ) -> Result<Self, TlsError> {
        let certs = parse_certificates(client_cert_pem)?;
        let key = parse_private_key(client_key_pem)?;

        let provider = rustls::crypto::ring::default_provider();
        let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification::default()))
            .with_client_auth_cert(certs, key)
            .map_err(|e| TlsError::config(format!("Failed to build client TLS config: {}", e)))?;

        config.alpn_protocols = vec![TUNNEL_ALPN.to_vec()];

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }

    /// Connect over any async stream using TLS.
    ///
    /// The `server_name` is used for SNI and, on the relay leg, certificate
    /// verification. Works with any stream implementing
    /// `AsyncRead + AsyncWrite + Unpin`, which is what lets the gateway
    /// handshake run over the relay's TLS stream.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Verification`] when the peer's certificate was
    /// rejected, [`TlsError::Handshake`] for any other handshake failure,
    /// and [`TlsError::Config`] for an invalid server name.
    pub async fn connect_stream<S>(
        &self,
        stream: S,
        server_name: &str,
    ) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::config(format!("Invalid server name: {}", server_name)))?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| {
                if is_certificate_error(&e) {
                    TlsError::verification(e.to_string())
                } else {
                    TlsError::handshake(e.to_string())
                }
            })
    }
}

/// Check whether a handshake I/O error was caused by certificate rejection.
///
/// tokio-rustls surfaces rustls errors wrapped in `std::io::Error`; this
/// distinguishes "peer not authorized" from transport failures.
fn is_certificate_error(err: &std::io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map(|e| {
            matches!(
                e,
                rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented
            )
        })
        .unwrap_or(false)
}

/// Certificate verifier that accepts any server certificate.
///
/// Used on the gateway leg, where the peer is identified by ALPN and mutual
/// TLS rather than hostname verification, and for pooled connections whose
/// deployment disabled verification.
#[derive(Debug, Default)]
pub(crate) struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_relay_rejects_bad_pem() {
        let result = TlsConnector::for_relay("garbage", "garbage", "garbage");
        assert!(result.is_err());
    }

    #[test]
    fn test_for_gateway_rejects_bad_pem() {
        let result = TlsConnector::for_gateway("", "", "");
        assert!(result.is_err());
    }

    #[test]
    fn test_is_certificate_error_plain_io() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!is_certificate_error(&err));
    }

    #[test]
    fn test_is_certificate_error_wrapped_rustls() {
        let rustls_err = rustls::Error::InvalidCertificate(rustls::CertificateError::Expired);
        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, rustls_err);
        assert!(is_certificate_error(&err));
    }

    #[test]
    fn test_alpn_constant() {
        assert_eq!(TUNNEL_ALPN, b"infisical-pam-proxy");
    }
}
