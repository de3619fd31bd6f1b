//! Shared stub collaborators for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use pamdb_broker::{
    Account, AccountStore, Actor, ActorType, BrokerError, CredentialVault, DatabaseCredentials,
    DatabaseKind, GatewayConnectionDetails, GatewayService, PamConnectionRequest, QueryPipeline,
    Resolver, Resource, ResourceStore, Result, Session, SessionCredentials, SessionStatus,
    SessionStore, TunnelRegistry,
};

/// One stub standing in for every external collaborator.
pub struct StubWorld {
    pub session: Option<Session>,
    pub account: Option<Account>,
    pub resource: Option<Resource>,
    pub credentials: Option<DatabaseCredentials>,
    pub details: Option<GatewayConnectionDetails>,
    /// When set, the vault fails with this message instead of returning
    /// credentials.
    pub vault_error: Option<String>,
    pub gateway_calls: AtomicUsize,
    pub vault_calls: AtomicUsize,
}

impl StubWorld {
    pub fn new() -> Self {
        Self {
            session: None,
            account: None,
            resource: None,
            credentials: None,
            details: None,
            vault_error: None,
            gateway_calls: AtomicUsize::new(0),
            vault_calls: AtomicUsize::new(0),
        }
    }

    pub fn gateway_call_count(&self) -> usize {
        self.gateway_calls.load(Ordering::SeqCst)
    }

    pub fn vault_call_count(&self) -> usize {
        self.vault_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for StubWorld {
    async fn find_by_id(&self, _session_id: &str) -> Result<Option<Session>> {
        Ok(self.session.clone())
    }
}

#[async_trait]
impl AccountStore for StubWorld {
    async fn find_by_id(&self, _account_id: &str) -> Result<Option<Account>> {
        Ok(self.account.clone())
    }
}

#[async_trait]
impl ResourceStore for StubWorld {
    async fn find_by_id(&self, _resource_id: &str) -> Result<Option<Resource>> {
        Ok(self.resource.clone())
    }
}

#[async_trait]
impl CredentialVault for StubWorld {
    async fn session_credentials(
        &self,
        _session_id: &str,
        _actor: &Actor,
    ) -> Result<SessionCredentials> {
        self.vault_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.vault_error {
            return Err(BrokerError::BadRequest(message.clone()));
        }
        let credentials = self
            .credentials
            .clone()
            .expect("stub world has no credentials configured");
        Ok(SessionCredentials {
            credentials,
            project_id: "proj-1".to_string(),
            account: self.account.clone().unwrap_or_else(test_account),
            session_started: Utc::now(),
        })
    }
}

#[async_trait]
impl GatewayService for StubWorld {
    async fn pam_connection_details(
        &self,
        _request: PamConnectionRequest,
    ) -> Result<Option<GatewayConnectionDetails>> {
        self.gateway_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.clone())
    }
}

/// Wire a pipeline (and its registry) over one stub world.
pub fn pipeline_for(world: Arc<StubWorld>) -> (QueryPipeline, Arc<TunnelRegistry>) {
    let resolver = Resolver::new(
        Arc::clone(&world) as Arc<dyn SessionStore>,
        Arc::clone(&world) as Arc<dyn AccountStore>,
        Arc::clone(&world) as Arc<dyn ResourceStore>,
        Arc::clone(&world) as Arc<dyn CredentialVault>,
        Arc::clone(&world) as Arc<dyn GatewayService>,
    );
    let registry = TunnelRegistry::shared();
    (
        QueryPipeline::new(resolver, Arc::clone(&registry)),
        registry,
    )
}

pub fn test_actor() -> Actor {
    Actor {
        id: "user-1".to_string(),
        actor_type: ActorType::User,
        name: "alex".to_string(),
    }
}

pub fn test_account() -> Account {
    Account {
        id: "acct-1".to_string(),
        resource_id: "res-1".to_string(),
    }
}

pub fn active_session(expires_at: Option<DateTime<Utc>>) -> Session {
    Session {
        id: "sess-1".to_string(),
        status: SessionStatus::Active,
        account_id: "acct-1".to_string(),
        project_id: "proj-1".to_string(),
        expires_at,
    }
}

pub fn ended_session() -> Session {
    Session {
        id: "sess-1".to_string(),
        status: SessionStatus::Ended,
        account_id: "acct-1".to_string(),
        project_id: "proj-1".to_string(),
        expires_at: None,
    }
}

pub fn postgres_resource(gateway_id: Option<&str>) -> Resource {
    Resource {
        id: "res-1".to_string(),
        resource_type: DatabaseKind::Postgres,
        gateway_id: gateway_id.map(str::to_string),
    }
}

pub fn postgres_credentials() -> DatabaseCredentials {
    DatabaseCredentials {
        kind: DatabaseKind::Postgres,
        host: "db.internal".to_string(),
        port: 5432,
        database: "postgres".to_string(),
        username: "svc".to_string(),
        password: "pw".to_string(),
        ssl_enabled: false,
        ssl_reject_unauthorized: true,
        ssl_certificate: None,
    }
}

pub fn far_future() -> DateTime<Utc> {
    Utc::now() + Duration::hours(1)
}
