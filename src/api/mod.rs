//! Thin HTTP surface over the query core.
//!
//! The host process owns the HTTP server, authentication, and rate
//! limiting; it mounts [`router`] behind its middleware and injects the
//! authenticated [`Actor`](crate::store::Actor) as a request extension
//! before requests reach the query endpoint.

pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::pipeline::QueryPipeline;
use crate::pool::ConnectionPool;

/// Shared state behind every handler.
pub struct AppState {
    pub pipeline: QueryPipeline,
    pub pool: Arc<ConnectionPool>,
}

impl AppState {
    pub fn new(pipeline: QueryPipeline, pool: Arc<ConnectionPool>) -> Self {
        Self { pipeline, pool }
    }
}

/// Build the PAM session router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/pam/sessions/:session_id/connect",
            post(handlers::connect_session),
        )
        .route(
            "/api/v1/pam/sessions/:session_id/query",
            post(handlers::execute_query),
        )
        .route(
            "/api/v1/pam/sessions/:session_id/disconnect",
            post(handlers::disconnect_session),
        )
        .route(
            "/api/v1/pam/sessions/connections/health",
            get(handlers::connection_health),
        )
        .with_state(state)
}
