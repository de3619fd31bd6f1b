//! Request/response models for the HTTP surface.

use serde::{Deserialize, Serialize};

use crate::executor::QueryField;
use crate::pool::PooledConnectionInfo;

/// Maximum accepted SQL statement length.
pub const MAX_SQL_LENGTH: usize = 100_000;

/// Body of `POST /api/v1/pam/sessions/{sessionId}/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequestBody {
    pub sql: String,
    #[serde(default)]
    pub params: Option<Vec<serde_json::Value>>,
}

impl QueryRequestBody {
    /// Validate the statement length bound (1..=100_000 chars).
    pub fn validate(&self) -> Result<(), String> {
        if self.sql.is_empty() {
            return Err("sql must not be empty".to_string());
        }
        if self.sql.chars().count() > MAX_SQL_LENGTH {
            return Err(format!(
                "sql must be at most {} characters",
                MAX_SQL_LENGTH
            ));
        }
        Ok(())
    }
}

/// Response of the query endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub fields: Vec<QueryField>,
    pub rows: Vec<Vec<Option<String>>>,
    #[serde(rename = "rowCount")]
    pub row_count: u64,
    #[serde(rename = "executionTimeMs")]
    pub execution_time_ms: u64,
}

/// Response of the connect endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub status: String,
    pub message: String,
    #[serde(rename = "serverVersion", skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Response of the disconnect endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectResponse {
    pub status: String,
    pub message: String,
}

/// Response of the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "activeConnections")]
    pub active_connections: usize,
    #[serde(rename = "connectionPoolInfo")]
    pub connection_pool_info: Vec<PooledConnectionInfo>,
}

/// Uniform error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_body_accepts_missing_params() {
        let body: QueryRequestBody = serde_json::from_str(r#"{"sql": "SELECT 1"}"#).unwrap();
        assert!(body.params.is_none());
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_query_body_rejects_empty_sql() {
        let body = QueryRequestBody {
            sql: String::new(),
            params: None,
        };
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_query_body_rejects_oversized_sql() {
        let body = QueryRequestBody {
            sql: "x".repeat(MAX_SQL_LENGTH + 1),
            params: None,
        };
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_query_body_accepts_boundary_length() {
        let body = QueryRequestBody {
            sql: "x".repeat(MAX_SQL_LENGTH),
            params: None,
        };
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_connect_response_omits_absent_fields() {
        let response = ConnectResponse {
            status: "connected".to_string(),
            message: "Session validated".to_string(),
            server_version: None,
            database: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("serverVersion"));
        assert!(!json.contains("database"));
    }

    #[test]
    fn test_query_response_camel_case() {
        let response = QueryResponse {
            fields: vec![],
            rows: vec![],
            row_count: 3,
            execution_time_ms: 12,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["rowCount"], 3);
        assert_eq!(json["executionTimeMs"], 12);
    }
}
