//! Credential and gateway resolution for the query pipeline.
//!
//! Given a session id and an actor, the resolver validates the session,
//! walks session → account → resource, fetches decrypted credentials from
//! the vault, and obtains the relay/gateway certificate bundle from the
//! gateway service. Pure orchestration over the collaborator traits in
//! [`crate::store`]; no network sockets are touched here.

use std::sync::Arc;

use chrono::Utc;

use crate::config::DEFAULT_RELAY_PORT;
use crate::error::{BrokerError, Result};
use crate::store::{
    Account, AccountStore, Actor, CredentialVault, DatabaseCredentials, GatewayBundle,
    GatewayService, PamConnectionRequest, Resource, ResourceStore, Session, SessionStore,
    SessionUsability,
};

/// Everything the pipeline needs to run one tunneled query.
#[derive(Debug, Clone)]
pub struct QueryTarget {
    pub session: Session,
    pub account: Account,
    pub resource: Resource,
    pub credentials: DatabaseCredentials,
    pub bundle: GatewayBundle,
}

/// Resolves sessions to credentials and tunnel material.
#[derive(Clone)]
pub struct Resolver {
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountStore>,
    resources: Arc<dyn ResourceStore>,
    vault: Arc<dyn CredentialVault>,
    gateway: Arc<dyn GatewayService>,
}

impl Resolver {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
        resources: Arc<dyn ResourceStore>,
        vault: Arc<dyn CredentialVault>,
        gateway: Arc<dyn GatewayService>,
    ) -> Self {
        Self {
            sessions,
            accounts,
            resources,
            vault,
            gateway,
        }
    }

    /// Fetch and validate the session record only.
    ///
    /// Used by the connect endpoint, which affirms usability without
    /// opening a tunnel.
    pub async fn validate_session(&self, session_id: &str) -> Result<Session> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound("Session not found".to_string()))?;

        match session.classify(Utc::now()) {
            SessionUsability::Usable => Ok(session),
            SessionUsability::Ended => Err(BrokerError::SessionEnded),
            SessionUsability::Expired => Err(BrokerError::SessionExpired),
        }
    }

    /// Resolve everything needed to execute a query for `session_id`.
    ///
    /// Fails fast, in order: session missing/ended/expired, account
    /// missing, resource missing, resource without gateway, vault failure,
    /// gateway service returning nothing. Vault errors propagate untouched.
    pub async fn resolve_for_query(&self, session_id: &str, actor: &Actor) -> Result<QueryTarget> {
        let session = self.validate_session(session_id).await?;

        let account = self
            .accounts
            .find_by_id(&session.account_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound("Account not found".to_string()))?;

        let resource = self
            .resources
            .find_by_id(&account.resource_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound("Resource not found".to_string()))?;

        let gateway_id = resource.gateway_id.clone().ok_or_else(|| {
            BrokerError::GatewayUnavailable(
                "Resource does not have a gateway configured".to_string(),
            )
        })?;

        let session_credentials = self.vault.session_credentials(session_id, actor).await?;

        let request = PamConnectionRequest {
            session_id: session_id.to_string(),
            gateway_id,
            resource_type: resource.resource_type,
            host: "localhost".to_string(),
            port: DEFAULT_RELAY_PORT,
            actor: Actor::system_gateway(),
        };

        let details = self
            .gateway
            .pam_connection_details(request)
            .await?
            .ok_or_else(|| {
                BrokerError::GatewayUnavailable(
                    "Failed to get gateway connection details".to_string(),
                )
            })?;

        debug!(
            session_id = %session_id,
            resource_id = %resource.id,
            resource_type = %resource.resource_type,
            relay_host = %details.relay_host,
            "Resolved query target"
        );

        Ok(QueryTarget {
            bundle: GatewayBundle::from_nested(details, session_id),
            session,
            account,
            resource,
            credentials: session_credentials.credentials,
        })
    }
}
