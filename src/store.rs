//! Records and collaborator contracts consumed by the broker core.
//!
//! The broker does not own persistence, credential decryption, or the
//! gateway control plane; it consumes them through the narrow traits
//! defined here. All records are plain data as returned by the external
//! facades.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Result;

/// Status of a PAM session as stored by the session facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session created but not yet active
    Starting,
    /// Session is live and may execute queries
    Active,
    /// Session has been terminated
    Ended,
}

/// How a session classifies against "can it be used right now".
///
/// Exactly one classification applies to every `(session, now)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUsability {
    /// Not ended and not expired
    Usable,
    /// Status is [`SessionStatus::Ended`]
    Ended,
    /// `expires_at` is at or before `now`
    Expired,
}

/// A PAM session record (read-only to the core).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    /// Absent means the session never expires on its own.
    #[serde(rename = "expiresAt", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Classify this session against `now`.
    ///
    /// Ended status wins over expiry; an `expires_at` equal to `now` counts
    /// as expired (usability requires strictly-in-the-future expiry).
    pub fn classify(&self, now: DateTime<Utc>) -> SessionUsability {
        if self.status == SessionStatus::Ended {
            return SessionUsability::Ended;
        }
        match self.expires_at {
            Some(expires_at) if expires_at <= now => SessionUsability::Expired,
            _ => SessionUsability::Usable,
        }
    }
}

/// A privileged account on a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
}

/// Which database engine a resource (and its credentials) targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    MySql,
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseKind::Postgres => write!(f, "postgres"),
            DatabaseKind::MySql => write!(f, "mysql"),
        }
    }
}

/// A target system governed by PAM (here, a database instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "resourceType")]
    pub resource_type: DatabaseKind,
    /// A resource without a gateway cannot be tunneled.
    #[serde(rename = "gatewayId", default)]
    pub gateway_id: Option<String>,
}

/// Decrypted database credentials for a session.
///
/// The password is zeroized on drop and redacted from `Debug`.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseCredentials {
    #[zeroize(skip)]
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "sslEnabled", default)]
    pub ssl_enabled: bool,
    #[serde(rename = "sslRejectUnauthorized", default = "default_true")]
    pub ssl_reject_unauthorized: bool,
    #[serde(rename = "sslCertificate", default)]
    pub ssl_certificate: Option<String>,
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ssl_enabled", &self.ssl_enabled)
            .field("ssl_reject_unauthorized", &self.ssl_reject_unauthorized)
            .finish()
    }
}

/// Kind of actor performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorType {
    User,
    Identity,
}

/// The actor on whose behalf a query (or gateway call) runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub name: String,
}

impl Actor {
    /// The fixed system actor presented to the gateway service.
    pub fn system_gateway() -> Self {
        Self {
            id: "system".to_string(),
            actor_type: ActorType::User,
            name: "PAM TCP Gateway".to_string(),
        }
    }
}

/// What the credential vault returns for a session.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub credentials: DatabaseCredentials,
    pub project_id: String,
    pub account: Account,
    pub session_started: DateTime<Utc>,
}

/// Request sent to the gateway service for connection details.
#[derive(Debug, Clone, Serialize)]
pub struct PamConnectionRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "gatewayId")]
    pub gateway_id: String,
    #[serde(rename = "resourceType")]
    pub resource_type: DatabaseKind,
    pub host: String,
    pub port: u16,
    #[serde(rename = "actorMetadata")]
    pub actor: Actor,
}

/// One side's certificate material inside the nested gateway response.
///
/// Fields the service omitted stay absent; they are never substituted with
/// empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateBundle {
    #[serde(rename = "clientCertificate", default)]
    pub client_certificate: Option<String>,
    #[serde(rename = "clientPrivateKey", default)]
    pub client_private_key: Option<String>,
    #[serde(rename = "serverCertificateChain", default)]
    pub server_certificate_chain: Option<String>,
}

/// The gateway service's nested response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConnectionDetails {
    #[serde(rename = "relayHost")]
    pub relay_host: String,
    #[serde(default)]
    pub relay: Option<CertificateBundle>,
    #[serde(default)]
    pub gateway: Option<CertificateBundle>,
}

/// Flattened gateway connection bundle consumed by the tunnel builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayBundle {
    pub relay_host: String,
    pub relay_client_certificate: Option<String>,
    pub relay_client_private_key: Option<String>,
    pub relay_server_certificate_chain: Option<String>,
    pub gateway_client_certificate: Option<String>,
    pub gateway_client_private_key: Option<String>,
    pub gateway_server_certificate_chain: Option<String>,
    pub session_id: String,
}

impl GatewayBundle {
    /// Flatten the nested service response. Pure projection: each flat
    /// field mirrors the corresponding nested field, absent stays absent.
    pub fn from_nested(details: GatewayConnectionDetails, session_id: impl Into<String>) -> Self {
        let GatewayConnectionDetails {
            relay_host,
            relay,
            gateway,
        } = details;
        let relay = relay.unwrap_or_default();
        let gateway = gateway.unwrap_or_default();

        Self {
            relay_host,
            relay_client_certificate: relay.client_certificate,
            relay_client_private_key: relay.client_private_key,
            relay_server_certificate_chain: relay.server_certificate_chain,
            gateway_client_certificate: gateway.client_certificate,
            gateway_client_private_key: gateway.client_private_key,
            gateway_server_certificate_chain: gateway.server_certificate_chain,
            session_id: session_id.into(),
        }
    }
}

/// Lookup of session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;
}

/// Lookup of account records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, account_id: &str) -> Result<Option<Account>>;
}

/// Lookup of resource records.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_by_id(&self, resource_id: &str) -> Result<Option<Resource>>;
}

/// Decrypts credentials for a session on behalf of an actor.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn session_credentials(
        &self,
        session_id: &str,
        actor: &Actor,
    ) -> Result<SessionCredentials>;
}

/// The gateway-v2 control plane.
#[async_trait]
pub trait GatewayService: Send + Sync {
    /// Returns the certificate material and relay endpoint for a session,
    /// or `None` when the gateway cannot serve it.
    async fn pam_connection_details(
        &self,
        request: PamConnectionRequest,
    ) -> Result<Option<GatewayConnectionDetails>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(status: SessionStatus, expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            id: "sess-1".to_string(),
            status,
            account_id: "acct-1".to_string(),
            project_id: "proj-1".to_string(),
            expires_at,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    // ========================================================================
    // Session classification
    // ========================================================================

    #[test]
    fn test_classify_active_no_expiry_is_usable() {
        let s = session(SessionStatus::Active, None);
        assert_eq!(s.classify(now()), SessionUsability::Usable);
    }

    #[test]
    fn test_classify_starting_is_usable() {
        let s = session(SessionStatus::Starting, None);
        assert_eq!(s.classify(now()), SessionUsability::Usable);
    }

    #[test]
    fn test_classify_ended_wins_over_expiry() {
        // Ended status classifies as Ended even with a future expiry
        let s = session(
            SessionStatus::Ended,
            Some(now() + chrono::Duration::hours(1)),
        );
        assert_eq!(s.classify(now()), SessionUsability::Ended);
    }

    #[test]
    fn test_classify_expiry_at_now_is_expired() {
        // Boundary: expires_at == now counts as expired (strict inequality)
        let s = session(SessionStatus::Active, Some(now()));
        assert_eq!(s.classify(now()), SessionUsability::Expired);
    }

    #[test]
    fn test_classify_expiry_in_past_is_expired() {
        let s = session(
            SessionStatus::Active,
            Some(now() - chrono::Duration::seconds(1)),
        );
        assert_eq!(s.classify(now()), SessionUsability::Expired);
    }

    #[test]
    fn test_classify_expiry_in_future_is_usable() {
        let s = session(
            SessionStatus::Active,
            Some(now() + chrono::Duration::seconds(1)),
        );
        assert_eq!(s.classify(now()), SessionUsability::Usable);
    }

    // ========================================================================
    // Bundle flattening
    // ========================================================================

    fn full_details() -> GatewayConnectionDetails {
        GatewayConnectionDetails {
            relay_host: "relay.example.com:8443".to_string(),
            relay: Some(CertificateBundle {
                client_certificate: Some("R1".to_string()),
                client_private_key: Some("R2".to_string()),
                server_certificate_chain: Some("R3".to_string()),
            }),
            gateway: Some(CertificateBundle {
                client_certificate: Some("G1".to_string()),
                client_private_key: Some("G2".to_string()),
                server_certificate_chain: Some("G3".to_string()),
            }),
        }
    }

    #[test]
    fn test_flatten_full_bundle() {
        let flat = GatewayBundle::from_nested(full_details(), "sess-1");
        assert_eq!(
            flat,
            GatewayBundle {
                relay_host: "relay.example.com:8443".to_string(),
                relay_client_certificate: Some("R1".to_string()),
                relay_client_private_key: Some("R2".to_string()),
                relay_server_certificate_chain: Some("R3".to_string()),
                gateway_client_certificate: Some("G1".to_string()),
                gateway_client_private_key: Some("G2".to_string()),
                gateway_server_certificate_chain: Some("G3".to_string()),
                session_id: "sess-1".to_string(),
            }
        );
    }

    #[test]
    fn test_flatten_missing_sides_stay_absent() {
        let details = GatewayConnectionDetails {
            relay_host: "relay.internal".to_string(),
            relay: None,
            gateway: Some(CertificateBundle {
                client_certificate: Some("G1".to_string()),
                client_private_key: None,
                server_certificate_chain: None,
            }),
        };
        let flat = GatewayBundle::from_nested(details, "s");
        assert_eq!(flat.relay_host, "relay.internal");
        assert!(flat.relay_client_certificate.is_none());
        assert!(flat.relay_client_private_key.is_none());
        assert!(flat.relay_server_certificate_chain.is_none());
        assert_eq!(flat.gateway_client_certificate.as_deref(), Some("G1"));
        assert!(flat.gateway_client_private_key.is_none());
    }

    #[test]
    fn test_nested_deserialization_shape() {
        let json = r#"{
            "relayHost": "relay.example.com:8443",
            "relay": {
                "clientCertificate": "R1",
                "clientPrivateKey": "R2",
                "serverCertificateChain": "R3"
            },
            "gateway": {
                "clientCertificate": "G1"
            }
        }"#;
        let details: GatewayConnectionDetails = serde_json::from_str(json).unwrap();
        let flat = GatewayBundle::from_nested(details, "s1");
        assert_eq!(flat.relay_client_certificate.as_deref(), Some("R1"));
        assert_eq!(flat.gateway_client_certificate.as_deref(), Some("G1"));
        assert!(flat.gateway_client_private_key.is_none());
    }

    // ========================================================================
    // Credentials and actors
    // ========================================================================

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = DatabaseCredentials {
            kind: DatabaseKind::Postgres,
            host: "db.internal".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "svc".to_string(),
            password: "secret123".to_string(),
            ssl_enabled: true,
            ssl_reject_unauthorized: true,
            ssl_certificate: None,
        };
        let out = format!("{:?}", creds);
        assert!(!out.contains("secret123"));
        assert!(out.contains("[REDACTED]"));
        assert!(out.contains("svc"));
    }

    #[test]
    fn test_system_gateway_actor() {
        let actor = Actor::system_gateway();
        assert_eq!(actor.id, "system");
        assert_eq!(actor.actor_type, ActorType::User);
        assert_eq!(actor.name, "PAM TCP Gateway");
    }

    #[test]
    fn test_actor_serializes_type_uppercase() {
        let json = serde_json::to_string(&Actor::system_gateway()).unwrap();
        assert!(json.contains("\"type\":\"USER\""));
    }

    #[test]
    fn test_database_kind_display() {
        assert_eq!(DatabaseKind::Postgres.to_string(), "postgres");
        assert_eq!(DatabaseKind::MySql.to_string(), "mysql");
    }
}
