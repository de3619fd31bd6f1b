//! pamdb-broker - Query-execution core of a PAM database broker
//!
//! This library provides the session-scoped query pipeline of a Privileged
//! Access Management database broker:
//! - Validates sessions and resolves credentials plus gateway material
//! - Builds a nested TLS tunnel (verified mTLS to a relay, ALPN-negotiated
//!   mTLS to a gateway inside it)
//! - Bridges the tunnel to a loopback listener so native PostgreSQL/MySQL
//!   drivers speak their own wire protocols through it
//! - Executes a single statement and normalizes the result set
//! - Tracks live tunnels per session for disconnect and shutdown
//! - Maintains a direct (non-tunneled) connection pool with idle eviction
//!   and health probing
//!
//! HTTP transport, authentication, persistence, and the credential vault
//! are external collaborators consumed through the traits in [`store`].

#[macro_use]
mod logging;

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod pool;
pub mod resolver;
pub mod store;
pub mod tls;
pub mod tunnel;

pub use config::{BrokerConfig, PoolConfig};
pub use error::{BrokerError, Result};
pub use executor::{QueryField, QueryResult};
pub use pipeline::{QueryPipeline, QueryRequest};
pub use pool::{ConnectionPool, PooledConnectionInfo};
pub use resolver::{QueryTarget, Resolver};
pub use store::{
    Account, AccountStore, Actor, ActorType, CertificateBundle, CredentialVault,
    DatabaseCredentials, DatabaseKind, GatewayBundle, GatewayConnectionDetails, GatewayService,
    PamConnectionRequest, Resource, ResourceStore, Session, SessionCredentials, SessionStatus,
    SessionStore, SessionUsability,
};
pub use tls::{TlsConnector, TlsError};
pub use tunnel::{LocalBridge, TunnelHandle, TunnelRegistry, TunnelSummary};
