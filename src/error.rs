//! Error types for pamdb-broker

use thiserror::Error;

use crate::tls::TlsError;

/// Main error type for the broker core.
///
/// Resolver failures keep their own variants so callers can map them to
/// precise HTTP statuses; tunnel and driver failures are wrapped into
/// [`BrokerError::BadRequest`] at the pipeline boundary so responses stay
/// uniform.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Session, account, resource, or pooled connection missing
    #[error("{0}")]
    NotFound(String),

    /// Session status is Ended
    #[error("Session has ended")]
    SessionEnded,

    /// Session expiry timestamp has passed
    #[error("Session has expired")]
    SessionExpired,

    /// Resource lacks a gateway, or the gateway service returned nothing
    #[error("{0}")]
    GatewayUnavailable(String),

    /// Relay or gateway handshake/transport failure
    #[error("{0}")]
    Tunnel(String),

    /// Database refused the connection or the query
    #[error("{0}")]
    Driver(String),

    /// Catch-all surfaced to HTTP callers
    #[error("{0}")]
    BadRequest(String),

    /// TLS/SSL error (certificate material, configuration)
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Fallback message when a pipeline failure has no usable inner message.
pub const QUERY_FAILURE_FALLBACK: &str = "Failed to execute query via gateway";

impl BrokerError {
    /// Wrap a pipeline-internal failure for the HTTP boundary.
    ///
    /// The surfaced message is the inner error's message, falling back to
    /// [`QUERY_FAILURE_FALLBACK`] when that message is empty.
    pub fn into_bad_request(self) -> BrokerError {
        let message = self.to_string();
        if message.is_empty() {
            BrokerError::BadRequest(QUERY_FAILURE_FALLBACK.to_string())
        } else {
            BrokerError::BadRequest(message)
        }
    }

    /// True for the resolver-originated variants that pass through the
    /// pipeline boundary unwrapped.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            BrokerError::NotFound(_)
                | BrokerError::SessionEnded
                | BrokerError::SessionExpired
                | BrokerError::GatewayUnavailable(_)
        )
    }
}

impl From<serde_yaml::Error> for BrokerError {
    fn from(err: serde_yaml::Error) -> Self {
        BrokerError::Config(err.to_string())
    }
}
