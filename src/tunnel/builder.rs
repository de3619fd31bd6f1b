//! Two-leg TLS tunnel construction.
//!
//! The outer leg authenticates the broker to the operator-controlled relay
//! with full hostname verification; the inner leg terminates mutual TLS at
//! the gateway colocated with the database, using ALPN to discriminate PAM
//! tunneling from other multiplexed protocols. Nesting the second handshake
//! inside the first keeps database wire traffic opaque to the relay.

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{DEFAULT_RELAY_PORT, GATEWAY_HANDSHAKE_TIMEOUT, RELAY_HANDSHAKE_TIMEOUT};
use crate::error::{BrokerError, Result};
use crate::store::GatewayBundle;
use crate::tls::{TlsConnector, TlsError, TUNNEL_ALPN};

/// The outer (broker→relay) TLS stream.
pub type RelayStream = tokio_rustls::client::TlsStream<TcpStream>;

/// The inner (broker→gateway) TLS stream, nested inside [`RelayStream`].
pub type TunnelStream = tokio_rustls::client::TlsStream<RelayStream>;

/// Split `relay_host` into host and port; the port defaults to 8443.
///
/// A present-but-unparsable port (e.g. `"relay:"`) is rejected before any
/// socket is opened.
fn parse_relay_host(relay_host: &str) -> Result<(String, u16)> {
    match relay_host.rsplit_once(':') {
        None => Ok((relay_host.to_string(), DEFAULT_RELAY_PORT)),
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| {
                BrokerError::Tunnel(format!(
                    "Relay TLS connection error: invalid relay port in {:?}",
                    relay_host
                ))
            })?;
            Ok((host.to_string(), port))
        }
    }
}

/// Build the nested tunnel described by `bundle`.
///
/// On success the returned stream is the gateway-side byte duplex the local
/// bridge splices the driver onto. On any failure every stream opened so
/// far is dropped before the error propagates.
pub async fn build(bundle: &GatewayBundle) -> Result<TunnelStream> {
    let (host, port) = parse_relay_host(&bundle.relay_host)?;

    let (relay_cert, relay_key, relay_chain) = match (
        &bundle.relay_client_certificate,
        &bundle.relay_client_private_key,
        &bundle.relay_server_certificate_chain,
    ) {
        (Some(cert), Some(key), Some(chain)) => (cert, key, chain),
        _ => {
            return Err(BrokerError::Tunnel(
                "Missing relay TLS certificates or keys".to_string(),
            ))
        }
    };

    let relay_connector = TlsConnector::for_relay(relay_cert, relay_key, relay_chain)
        .map_err(|e| BrokerError::Tunnel(format!("Relay TLS connection error: {}", e)))?;

    debug!(
        session_id = %bundle.session_id,
        relay = %format!("{}:{}", host, port),
        "Connecting to relay"
    );

    let outer = timeout(RELAY_HANDSHAKE_TIMEOUT, async {
        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(TlsError::from)?;
        relay_connector.connect_stream(tcp, &host).await
    })
    .await
    .map_err(|_| {
        BrokerError::Tunnel(format!(
            "Relay TLS connection error: handshake timed out after {:?}",
            RELAY_HANDSHAKE_TIMEOUT
        ))
    })?
    .map_err(|e| match e {
        TlsError::Verification(reason) => {
            BrokerError::Tunnel(format!("Relay TLS authorization failed: {}", reason))
        }
        TlsError::Handshake(reason) => {
            BrokerError::Tunnel(format!("Relay TLS connection error: {}", reason))
        }
        TlsError::Io(io_err) => {
            BrokerError::Tunnel(format!("Relay TLS connection error: {}", io_err))
        }
        other => BrokerError::Tunnel(format!("Relay TLS connection error: {}", other)),
    })?;

    let (gateway_cert, gateway_key, gateway_chain) = match (
        &bundle.gateway_client_certificate,
        &bundle.gateway_client_private_key,
        &bundle.gateway_server_certificate_chain,
    ) {
        (Some(cert), Some(key), Some(chain)) => (cert, key, chain),
        _ => {
            // Dropping `outer` here destroys the relay stream before the
            // error surfaces.
            return Err(BrokerError::Tunnel(
                "Missing gateway TLS certificates or keys".to_string(),
            ));
        }
    };

    let gateway_connector = TlsConnector::for_gateway(gateway_cert, gateway_key, gateway_chain)
        .map_err(|e| BrokerError::Tunnel(format!("Gateway TLS handshake failed: {}", e)))?;

    debug!(
        session_id = %bundle.session_id,
        "Starting gateway handshake inside relay stream"
    );

    let inner = timeout(
        GATEWAY_HANDSHAKE_TIMEOUT,
        gateway_connector.connect_stream(outer, "localhost"),
    )
    .await
    .map_err(|_| {
        BrokerError::Tunnel(format!(
            "Gateway TLS handshake failed: timed out after {:?}",
            GATEWAY_HANDSHAKE_TIMEOUT
        ))
    })?
    .map_err(|e| match e {
        TlsError::Handshake(reason) | TlsError::Verification(reason) => {
            BrokerError::Tunnel(format!("Gateway TLS handshake failed: {}", reason))
        }
        other => BrokerError::Tunnel(format!("Gateway TLS handshake failed: {}", other)),
    })?;

    // The gateway must have selected our ALPN protocol; a handshake that
    // negotiated nothing is talking to the wrong endpoint.
    match inner.get_ref().1.alpn_protocol() {
        Some(proto) if proto == TUNNEL_ALPN => {}
        _ => {
            return Err(BrokerError::Tunnel(
                "Gateway TLS handshake failed: no application protocol negotiated".to_string(),
            ));
        }
    }

    info!(
        session_id = %bundle.session_id,
        relay = %format!("{}:{}", host, port),
        "Tunnel established"
    );

    Ok(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with(relay_host: &str) -> GatewayBundle {
        GatewayBundle {
            relay_host: relay_host.to_string(),
            relay_client_certificate: Some("R1".to_string()),
            relay_client_private_key: Some("R2".to_string()),
            relay_server_certificate_chain: Some("R3".to_string()),
            gateway_client_certificate: Some("G1".to_string()),
            gateway_client_private_key: Some("G2".to_string()),
            gateway_server_certificate_chain: Some("G3".to_string()),
            session_id: "sess-1".to_string(),
        }
    }

    #[test]
    fn test_parse_relay_host_with_port() {
        assert_eq!(
            parse_relay_host("relay.example.com:9443").unwrap(),
            ("relay.example.com".to_string(), 9443)
        );
    }

    #[test]
    fn test_parse_relay_host_without_port_defaults() {
        assert_eq!(
            parse_relay_host("relay.example.com").unwrap(),
            ("relay.example.com".to_string(), 8443)
        );
    }

    #[test]
    fn test_parse_relay_host_empty_port_rejected() {
        let err = parse_relay_host("relay.example.com:").unwrap_err();
        assert!(err.to_string().contains("invalid relay port"));
    }

    #[test]
    fn test_parse_relay_host_non_numeric_port_rejected() {
        assert!(parse_relay_host("relay.example.com:https").is_err());
    }

    #[tokio::test]
    async fn test_build_missing_relay_certs_fails_before_connect() {
        // Host that would never connect anyway; the precondition must trip
        // first, with the literal message.
        let mut bundle = bundle_with("relay.invalid:1");
        bundle.relay_client_private_key = None;
        let err = build(&bundle).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing relay TLS certificates or keys");
    }

    #[tokio::test]
    async fn test_build_each_missing_relay_field_fails() {
        for strip in 0..3 {
            let mut bundle = bundle_with("relay.invalid:1");
            match strip {
                0 => bundle.relay_client_certificate = None,
                1 => bundle.relay_client_private_key = None,
                _ => bundle.relay_server_certificate_chain = None,
            }
            let err = build(&bundle).await.unwrap_err();
            assert_eq!(err.to_string(), "Missing relay TLS certificates or keys");
        }
    }

    #[tokio::test]
    async fn test_build_bad_relay_pem_is_connection_error() {
        // All three fields present but not valid PEM: fails while building
        // the connector, before any socket is opened.
        let bundle = bundle_with("relay.invalid:1");
        let err = build(&bundle).await.unwrap_err();
        assert!(err.to_string().starts_with("Relay TLS connection error:"));
    }

    #[tokio::test]
    async fn test_build_unparsable_port_rejected() {
        let bundle = bundle_with("relay.invalid:");
        let err = build(&bundle).await.unwrap_err();
        assert!(err.to_string().contains("invalid relay port"));
    }
}
