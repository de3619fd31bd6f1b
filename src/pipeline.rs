//! The session-scoped query pipeline.
//!
//! `execute_query` is the public entry point for a tunneled query:
//! validate and resolve the session, build the nested TLS tunnel, bridge it
//! to a loopback listener, run the statement through a native driver, and
//! deterministically tear everything down. Resolver failures pass through
//! unwrapped; everything downstream surfaces as a single `BadRequest` so
//! HTTP responses stay uniform.

use std::sync::Arc;

use crate::error::{BrokerError, Result};
use crate::executor::{self, QueryResult};
use crate::resolver::Resolver;
use crate::store::Actor;
use crate::tunnel::{builder, LocalBridge, TunnelHandle, TunnelRegistry};

/// One query request on behalf of a session.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub session_id: String,
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub actor: Actor,
}

/// Drives resolve → tunnel → bridge → execute → teardown.
#[derive(Clone)]
pub struct QueryPipeline {
    resolver: Resolver,
    registry: Arc<TunnelRegistry>,
}

impl QueryPipeline {
    pub fn new(resolver: Resolver, registry: Arc<TunnelRegistry>) -> Self {
        Self { resolver, registry }
    }

    /// The resolver, for callers that only need session validation.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The tunnel registry this pipeline registers handles in.
    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Execute one statement for a session through a fresh tunnel.
    ///
    /// A successful call leaves no tunnel registered for the session and no
    /// open sockets attributable to it; so does a failing call.
    pub async fn execute_query(&self, request: QueryRequest) -> Result<QueryResult> {
        let target = self
            .resolver
            .resolve_for_query(&request.session_id, &request.actor)
            .await?;

        debug!(
            session_id = %request.session_id,
            kind = %target.credentials.kind,
            "Starting tunneled query"
        );

        match self.run_tunneled(&request, &target).await {
            Ok(result) => {
                info!(
                    session_id = %request.session_id,
                    row_count = result.row_count,
                    "Query completed"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(
                    session_id = %request.session_id,
                    error = %err,
                    "Tunneled query failed"
                );
                Err(err.into_bad_request())
            }
        }
    }

    async fn run_tunneled(
        &self,
        request: &QueryRequest,
        target: &crate::resolver::QueryTarget,
    ) -> Result<QueryResult> {
        let tunnel = builder::build(&target.bundle).await?;

        // A bind failure consumed the tunnel stream; dropping it destroys
        // both TLS layers.
        let bridge = LocalBridge::open(tunnel).await?;
        let local_port = bridge.port();

        // Registering hands teardown ownership to the registry. A prior
        // tunnel for this session is superseded here.
        let handle = self
            .registry
            .register(TunnelHandle::new(&request.session_id, bridge))
            .await;

        let outcome = executor::execute(
            &target.credentials,
            local_port,
            &request.sql,
            &request.params,
        )
        .await;

        // Teardown runs on both paths. If close_all() raced us and already
        // tore the handle down, close_one is a no-op and the executor error
        // above is what the caller sees.
        self.registry.close_one(&request.session_id).await;

        match outcome {
            Ok(result) => Ok(result),
            Err(err) => {
                // A listener that died before the driver ever connected
                // makes the driver fail with an ordinary refused
                // connection; report the bridge failure instead.
                if let Some(bridge_err) = handle.take_bridge_failure() {
                    return Err(BrokerError::Tunnel(format!(
                        "Local bridge listener failed before accept: {}",
                        bridge_err
                    )));
                }
                Err(err)
            }
        }
    }
}
