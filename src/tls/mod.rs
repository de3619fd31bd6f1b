//! TLS support for the broker core
//!
//! This module provides client-side TLS for:
//! - **Relay leg**: strict, hostname-verified mTLS from the broker to the
//!   operator-controlled relay
//! - **Gateway leg**: ALPN-discriminated mTLS to the gateway, nested inside
//!   the relay stream (the gateway is identified by ALPN + client cert, not
//!   by hostname)
//! - **Direct pool**: optional TLS from pooled driver connections to
//!   directly-reachable databases
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐    outer TLS    ┌───────┐   (opaque bytes)   ┌─────────┐
//! │  Broker  │ ─────────────── │ Relay │ ────────────────── │ Gateway │──▶ DB
//! └──────────┘                 └───────┘                    └─────────┘
//!       └────────────── inner TLS (ALPN, mTLS) ──────────────────┘
//! ```
//!
//! Certificate material arrives as in-memory PEM strings inside the gateway
//! connection bundle, never as file paths.
//!
//! # Security
//!
//! - Uses rustls (pure Rust TLS implementation) for memory safety
//! - TLS 1.2 minimum, TLS 1.3 preferred
//! - Relay leg: certificate verification always on
//! - Gateway leg: hostname verification replaced by ALPN + mutual TLS

mod connector;
mod error;

pub use connector::{TlsConnector, TUNNEL_ALPN};
pub use error::TlsError;

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

/// Parse all certificates from an in-memory PEM string.
///
/// Supports certificate chains; returns an error when the PEM contains no
/// certificate at all.
pub(crate) fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_parse(e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::cert_parse("no certificates found in PEM input"));
    }

    Ok(certs)
}

/// Parse a private key from an in-memory PEM string.
///
/// Supports RSA, PKCS8, and EC keys.
pub(crate) fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| TlsError::key_parse(e.to_string()))?
        .ok_or_else(|| TlsError::key_parse("no private key found in PEM input"))
}

/// Build a root store from a PEM chain, or fall back to the webpki roots.
pub(crate) fn build_root_store(chain_pem: Option<&str>) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    match chain_pem {
        Some(pem) => {
            for cert in parse_certificates(pem)? {
                root_store
                    .add(cert)
                    .map_err(|e| TlsError::cert_parse(e.to_string()))?;
            }
        }
        None => {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    Ok(root_store)
}

/// Build a rustls client config for a pooled driver connection.
///
/// When `verify_peer` is false the server certificate is accepted without
/// verification (the deployment opted out via `ssl_reject_unauthorized`);
/// otherwise the chain from `root_chain` (or the webpki roots) is enforced.
pub fn database_client_config(
    root_chain: Option<&str>,
    verify_peer: bool,
) -> Result<ClientConfig, TlsError> {
    let provider = rustls::crypto::ring::default_provider();

    let config = if verify_peer {
        let root_store = build_root_store(root_chain)?;
        ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(
                connector::NoCertificateVerification::default(),
            ))
            .with_no_client_auth()
    };

    Ok(config)
}
