//! PostgreSQL statement execution via tokio-postgres.

use tokio::time::timeout;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};

use super::{QueryField, QueryResult};
use crate::config::DRIVER_CONNECT_TIMEOUT;
use crate::error::{BrokerError, Result};
use crate::store::DatabaseCredentials;

/// Connect to the bridge, run one statement, tear the connection down.
pub(crate) async fn execute(
    credentials: &DatabaseCredentials,
    local_port: u16,
    sql: &str,
    params: &[serde_json::Value],
) -> Result<QueryResult> {
    let mut config = tokio_postgres::Config::new();
    config
        .host("127.0.0.1")
        .port(local_port)
        .user(&credentials.username)
        .password(&credentials.password)
        .dbname(&credentials.database)
        // TLS toward the bridge is always off; the tunnel already provides it
        .ssl_mode(tokio_postgres::config::SslMode::Disable)
        .connect_timeout(DRIVER_CONNECT_TIMEOUT);

    let (client, connection) = timeout(DRIVER_CONNECT_TIMEOUT, config.connect(NoTls))
        .await
        .map_err(|_| {
            BrokerError::Driver(format!(
                "Database connection timed out after {:?}",
                DRIVER_CONNECT_TIMEOUT
            ))
        })?
        .map_err(driver_error)?;

    // The connection future drives socket I/O; it ends when the client is
    // dropped or the bridge collapses under it.
    let io_task = tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Postgres connection task ended with error");
        }
    });

    let outcome = run_statement(&client, sql, params).await;

    drop(client);
    io_task.abort();

    outcome
}

async fn run_statement(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[serde_json::Value],
) -> Result<QueryResult> {
    let statement = client.prepare(sql).await.map_err(driver_error)?;

    let fields: Vec<QueryField> = statement
        .columns()
        .iter()
        .map(|column| QueryField {
            name: column.name().to_string(),
            data_type: column.type_().oid().to_string(),
        })
        .collect();

    let bound = bind_params(params);
    let param_refs: Vec<&(dyn ToSql + Sync)> = bound
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();

    if fields.is_empty() {
        // No result columns: a command. The driver reports affected rows.
        let affected = client
            .execute(&statement, &param_refs)
            .await
            .map_err(driver_error)?;
        Ok(QueryResult {
            fields,
            rows: Vec::new(),
            row_count: affected,
        })
    } else {
        let rows = client
            .query(&statement, &param_refs)
            .await
            .map_err(driver_error)?;
        let row_count = rows.len() as u64;
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| render_cell(row, idx))
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(QueryResult {
            fields,
            rows,
            row_count,
        })
    }
}

/// Map JSON scalars onto typed driver parameters.
fn bind_params(params: &[serde_json::Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync + Send> {
            match value {
                serde_json::Value::Null => Box::new(Option::<String>::None),
                serde_json::Value::Bool(b) => Box::new(*b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Box::new(i)
                    } else {
                        Box::new(n.as_f64().unwrap_or(f64::NAN))
                    }
                }
                serde_json::Value::String(s) => Box::new(s.clone()),
                other => Box::new(other.to_string()),
            }
        })
        .collect()
}

/// Render one cell as its text representation.
///
/// tokio-postgres hands cells back in binary format, so rendering walks a
/// cascade of concrete types and falls back to the raw text for anything
/// unrecognized.
fn render_cell(row: &Row, idx: usize) -> Option<String> {
    macro_rules! try_type {
        ($ty:ty) => {
            if let Ok(value) = row.try_get::<_, Option<$ty>>(idx) {
                return value.map(|v| v.to_string());
            }
        };
    }

    try_type!(String);
    try_type!(i64);
    try_type!(i32);
    try_type!(i16);
    try_type!(f64);
    try_type!(f32);
    try_type!(bool);

    if let Ok(value) = row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx) {
        return value.map(|v| v.to_rfc3339());
    }
    if let Ok(value) = row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<_, Option<chrono::NaiveDate>>(idx) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<_, Option<uuid::Uuid>>(idx) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<_, Option<Vec<u8>>>(idx) {
        return value.map(|v| String::from_utf8_lossy(&v).to_string());
    }

    let column_type = row
        .columns()
        .get(idx)
        .map(|c| c.type_().clone())
        .unwrap_or(Type::TEXT);
    debug!(
        data_type = %column_type,
        "Unrenderable postgres cell type"
    );
    Some(format!("<{}>", column_type))
}

fn driver_error(err: tokio_postgres::Error) -> BrokerError {
    BrokerError::Driver(err.to_string())
}
