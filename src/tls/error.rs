//! TLS-specific error types
//!
//! This module defines errors that can occur during TLS operations:
//! certificate/key parsing, handshake failures, and configuration problems.
//! Certificate material arrives as in-memory PEM strings (from the gateway
//! connection bundle), so parse errors carry a reason rather than a path.

use thiserror::Error;

/// TLS-specific errors
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to parse certificate material from PEM
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Failed to parse a private key from PEM
    #[error("Failed to parse private key: {0}")]
    PrivateKeyParse(String),

    /// TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Certificate verification failed
    #[error("Certificate verification failed: {0}")]
    Verification(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// I/O error during TLS operation
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// Create a certificate parse error
    pub fn cert_parse(reason: impl Into<String>) -> Self {
        TlsError::CertificateParse(reason.into())
    }

    /// Create a private key parse error
    pub fn key_parse(reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyParse(reason.into())
    }

    /// Create a handshake error
    pub fn handshake(reason: impl Into<String>) -> Self {
        TlsError::Handshake(reason.into())
    }

    /// Create a verification error
    pub fn verification(reason: impl Into<String>) -> Self {
        TlsError::Verification(reason.into())
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        TlsError::Config(reason.into())
    }
}
