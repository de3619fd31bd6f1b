//! Driver-level query execution against the loopback bridge.
//!
//! One statement, one driver connection: the executor dials
//! `127.0.0.1:{port}` (the bridge), authenticates with the session's
//! decrypted credentials, runs the statement, normalizes the result, and
//! closes the connection. TLS toward the bridge is always off — transport
//! security is the tunnel's job.

pub(crate) mod mysql;
pub(crate) mod postgres;

use serde::Serialize;

use crate::error::Result;
use crate::store::{DatabaseCredentials, DatabaseKind};

/// One column of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryField {
    /// Driver-reported column name.
    pub name: String,
    /// Stringified native type identifier (Postgres type OID, MySQL column
    /// type code). Opaque to callers; cross-driver uniformity is a
    /// non-goal.
    #[serde(rename = "dataType")]
    pub data_type: String,
}

/// A normalized result set: row-major cells aligned to `fields`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub fields: Vec<QueryField>,
    /// Cell values as the driver's text rendering; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
    #[serde(rename = "rowCount")]
    pub row_count: u64,
}

/// Execute one statement through the bridge at `local_port`.
///
/// `params` are forwarded to the driver's parameterized-query facility;
/// JSON scalars map to native values and compound values degrade to their
/// JSON text.
pub async fn execute(
    credentials: &DatabaseCredentials,
    local_port: u16,
    sql: &str,
    params: &[serde_json::Value],
) -> Result<QueryResult> {
    match credentials.kind {
        DatabaseKind::Postgres => postgres::execute(credentials, local_port, sql, params).await,
        DatabaseKind::MySql => mysql::execute(credentials, local_port, sql, params).await,
    }
}
