//! MySQL statement execution via mysql_async.

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Value};
use tokio::time::timeout;

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
    let opts: Opts = OptsBuilder::default()
        .ip_or_hostname("127.0.0.1")
        .tcp_port(local_port)
        .user(Some(credentials.username.clone()))
        .pass(Some(credentials.password.clone()))
        .db_name(Some(credentials.database.clone()))
        // The bridge is a TCP listener; never let the driver chase the
        // server-advertised unix socket.
        .prefer_socket(false)
        .ssl_opts(None::<mysql_async::SslOpts>)
        .into();

    let mut conn = timeout(DRIVER_CONNECT_TIMEOUT, Conn::new(opts))
        .await
        .map_err(|_| {
            BrokerError::Driver(format!(
                "Database connection timed out after {:?}",
                DRIVER_CONNECT_TIMEOUT
            ))
        })?
        .map_err(driver_error)?;

    let outcome = run_statement(&mut conn, sql, params).await;

    // Polite quit; errors during teardown don't outrank the query outcome.
    if let Err(e) = conn.disconnect().await {
        debug!(error = %e, "MySQL disconnect failed");
    }

    outcome
}

async fn run_statement(
    conn: &mut Conn,
    sql: &str,
    params: &[serde_json::Value],
) -> Result<QueryResult> {
    if params.is_empty() {
        let mut result = conn.query_iter(sql).await.map_err(driver_error)?;
        collect_result(&mut result).await
    } else {
        let bound = Params::Positional(params.iter().map(bind_param).collect());
        let mut result = conn.exec_iter(sql, bound).await.map_err(driver_error)?;
        collect_result(&mut result).await
    }
}

async fn collect_result<P>(result: &mut mysql_async::QueryResult<'_, '_, P>) -> Result<QueryResult>
where
    P: Protocol,
{
    let fields: Vec<QueryField> = result
        .columns()
        .map(|columns| {
            columns
                .iter()
                .map(|column| QueryField {
                    name: column.name_str().to_string(),
                    data_type: (column.column_type() as u8).to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<mysql_async::Row> = result.collect().await.map_err(driver_error)?;

    let row_count = if fields.is_empty() {
        result.affected_rows()
    } else {
        rows.len() as u64
    };

    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|idx| row.as_ref(idx).and_then(render_value))
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(QueryResult {
        fields,
        rows,
        row_count,
    })
}

/// Map a JSON scalar onto a MySQL value.
fn bind_param(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::NULL,
        serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Bytes(s.clone().into_bytes()),
        other => Value::Bytes(other.to_string().into_bytes()),
    }
}

/// Render a MySQL value as its text representation; NULL maps to `None`.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if *hour == 0 && *minute == 0 && *second == 0 && *micros == 0 {
                Some(format!("{:04}-{:02}-{:02}", year, month, day))
            } else {
                Some(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                    year, month, day, hour, minute, second, micros
                ))
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u32::from(*hours) + *days * 24;
            Some(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, minutes, seconds, micros
            ))
        }
    }
}

fn driver_error(err: mysql_async::Error) -> BrokerError {
    BrokerError::Driver(err.to_string())
}
