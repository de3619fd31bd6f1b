//! HTTP handlers: thin wrappers over the query core.
//!
//! Authentication is the host's concern: these handlers expect the host to
//! run them behind its bearer-token middleware and to inject the calling
//! [`Actor`] as a request extension.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use super::models::{
    ConnectResponse, DisconnectResponse, ErrorResponse, HealthResponse, QueryRequestBody,
    QueryResponse,
};
use super::AppState;
use crate::error::BrokerError;
use crate::pipeline::QueryRequest;
use crate::store::Actor;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a broker error onto a status code and uniform body.
fn error_response(err: BrokerError) -> ApiError {
    let (status, label) = match &err {
        BrokerError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
        BrokerError::SessionEnded => (StatusCode::BAD_REQUEST, "SessionEnded"),
        BrokerError::SessionExpired => (StatusCode::BAD_REQUEST, "SessionExpired"),
        BrokerError::GatewayUnavailable(_) => (StatusCode::BAD_REQUEST, "GatewayUnavailable"),
        BrokerError::Tunnel(_) => (StatusCode::BAD_REQUEST, "TunnelError"),
        BrokerError::Driver(_) => (StatusCode::BAD_REQUEST, "DriverError"),
        BrokerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
        BrokerError::Tls(_) | BrokerError::Io(_) | BrokerError::Config(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: label.to_string(),
            message: err.to_string(),
        }),
    )
}

/// `POST /api/v1/pam/sessions/{sessionId}/connect`
///
/// Affirms the session is usable without opening a tunnel.
pub async fn connect_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<ConnectResponse>, ApiError> {
    state
        .pipeline
        .resolver()
        .validate_session(&session_id)
        .await
        .map_err(error_response)?;

    Ok(Json(ConnectResponse {
        status: "connected".to_string(),
        message: "Session validated".to_string(),
        server_version: None,
        database: None,
    }))
}

/// `POST /api/v1/pam/sessions/{sessionId}/query`
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<QueryRequestBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    body.validate()
        .map_err(|message| error_response(BrokerError::BadRequest(message)))?;

    let started = Instant::now();
    let result = state
        .pipeline
        .execute_query(QueryRequest {
            session_id,
            sql: body.sql,
            params: body.params.unwrap_or_default(),
            actor,
        })
        .await
        .map_err(error_response)?;

    Ok(Json(QueryResponse {
        fields: result.fields,
        rows: result.rows,
        row_count: result.row_count,
        execution_time_ms: started.elapsed().as_millis() as u64,
    }))
}

/// `POST /api/v1/pam/sessions/{sessionId}/disconnect`
///
/// Closes only the requesting session's tunnel.
pub async fn disconnect_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let closed = state.pipeline.registry().close_one(&session_id).await;

    Ok(Json(DisconnectResponse {
        status: "disconnected".to_string(),
        message: if closed {
            "Session tunnel closed".to_string()
        } else {
            "No active tunnel for session".to_string()
        },
    }))
}

/// `GET /api/v1/pam/sessions/connections/health`
///
/// Read-only view over the tunnel registry and the direct pool.
pub async fn connection_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let tunnels = state.pipeline.registry().active_count().await;
    let connection_pool_info = state.pool.info().await;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        active_connections: tunnels + connection_pool_info.len(),
        connection_pool_info,
    }))
}
