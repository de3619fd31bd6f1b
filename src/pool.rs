//! Direct (non-tunneled) connection pool.
//!
//! Deployments whose databases are reachable without a gateway keep one
//! long-lived driver connection per session. The pool owns those
//! connections: it hands them out by session id, refreshes their idle
//! clock, probes their health, evicts idle entries from a background
//! sweeper, and closes everything on shutdown.
//!
//! The pool is injected by the host process and shut down through
//! [`ConnectionPool::destroy`]; nothing here relies on finalizers.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mysql_async::prelude::Queryable;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_postgres::NoTls;

use crate::config::{PoolConfig, DRIVER_CONNECT_TIMEOUT};
use crate::error::{BrokerError, Result};
use crate::store::{DatabaseCredentials, DatabaseKind};
use crate::tls;

/// A live driver connection owned by the pool.
#[derive(Debug)]
enum DriverConnection {
    Postgres {
        client: tokio_postgres::Client,
        io_task: JoinHandle<()>,
    },
    MySql(mysql_async::Conn),
}

/// One pooled entry. Exactly one exists per session id.
#[derive(Debug)]
pub struct PooledConnection {
    session_id: String,
    kind: DatabaseKind,
    created_at: DateTime<Utc>,
    last_used: StdMutex<Instant>,
    conn: Mutex<Option<DriverConnection>>,
}

impl PooledConnection {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Refresh the idle clock. Monotone: a refresh never moves it backward.
    fn touch(&self) {
        let mut last_used = self.last_used.lock().unwrap();
        *last_used = Instant::now().max(*last_used);
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().unwrap().elapsed()
    }
}

/// Snapshot row for the health endpoint (no credentials).
#[derive(Debug, Clone, Serialize)]
pub struct PooledConnectionInfo {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "resourceType")]
    pub resource_type: DatabaseKind,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastUsed")]
    pub last_used: DateTime<Utc>,
}

/// Process-wide map of sessionId → live driver connection.
pub struct ConnectionPool {
    entries: RwLock<HashMap<String, Arc<PooledConnection>>>,
    max_idle: Duration,
    shutdown_tx: broadcast::Sender<()>,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create the pool and start its background sweeper.
    pub fn new(config: &PoolConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let pool = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            max_idle: config.max_idle(),
            shutdown_tx,
            sweeper: StdMutex::new(None),
        });

        let task = Self::start_sweeper(
            Arc::clone(&pool),
            config.health_check_interval(),
            shutdown_rx,
        );
        *pool.sweeper.lock().unwrap() = Some(task);

        pool
    }

    /// Get the existing connection for a session or open a new one.
    ///
    /// An existing entry has its idle clock refreshed and is returned as
    /// is; otherwise a driver connection is opened (10 s bound) and
    /// inserted. If two tasks race to create the same session's entry, the
    /// first insert wins and the loser's connection is closed.
    pub async fn create(
        &self,
        session_id: &str,
        credentials: &DatabaseCredentials,
    ) -> Result<Arc<PooledConnection>> {
        if let Some(existing) = self.lookup(session_id).await {
            existing.touch();
            debug!(session_id = %session_id, "Reusing pooled connection");
            return Ok(existing);
        }

        let conn = open_driver(credentials).await?;
        let entry = Arc::new(PooledConnection {
            session_id: session_id.to_string(),
            kind: credentials.kind,
            created_at: Utc::now(),
            last_used: StdMutex::new(Instant::now()),
            conn: Mutex::new(Some(conn)),
        });

        let raced = {
            let mut entries = self.entries.write().await;
            match entries.get(session_id) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    entries.insert(session_id.to_string(), Arc::clone(&entry));
                    None
                }
            }
        };

        if let Some(existing) = raced {
            debug!(session_id = %session_id, "Lost creation race, closing duplicate");
            close_entry(&entry).await;
            existing.touch();
            return Ok(existing);
        }

        info!(
            session_id = %session_id,
            kind = %credentials.kind,
            "Pooled connection created"
        );
        Ok(entry)
    }

    /// Get the connection for a session, refreshing its idle clock.
    pub async fn get(&self, session_id: &str) -> Result<Arc<PooledConnection>> {
        match self.lookup(session_id).await {
            Some(entry) => {
                entry.touch();
                Ok(entry)
            }
            None => Err(BrokerError::NotFound(
                "No connection found for session.".to_string(),
            )),
        }
    }

    /// Mark a session's connection as recently used.
    ///
    /// Pooled connections are session-sticky; releasing only refreshes the
    /// idle clock.
    pub async fn release(&self, session_id: &str) {
        if let Some(entry) = self.lookup(session_id).await {
            entry.touch();
        }
    }

    /// Close and remove a session's connection.
    ///
    /// The entry leaves the map before the driver teardown runs, so the
    /// sweeper never observes a half-closed entry; teardown errors are
    /// swallowed.
    pub async fn close(&self, session_id: &str) {
        let removed = {
            let mut entries = self.entries.write().await;
            entries.remove(session_id)
        };

        if let Some(entry) = removed {
            close_entry(&entry).await;
            debug!(session_id = %session_id, "Pooled connection closed");
        }
    }

    /// Probe a session's connection with `SELECT 1`.
    ///
    /// Returns false (and evicts the entry) on probe failure or when no
    /// entry exists; probe failures are never surfaced to callers.
    pub async fn health_check(&self, session_id: &str) -> bool {
        let Some(entry) = self.lookup(session_id).await else {
            return false;
        };

        let healthy = {
            let mut guard = entry.conn.lock().await;
            match guard.as_mut() {
                Some(DriverConnection::Postgres { client, .. }) => {
                    client.simple_query("SELECT 1").await.is_ok()
                }
                Some(DriverConnection::MySql(conn)) => {
                    conn.query_drop("SELECT 1").await.is_ok()
                }
                None => false,
            }
        };

        if !healthy {
            warn!(session_id = %session_id, "Health check failed, evicting connection");
            self.close(session_id).await;
        }
        healthy
    }

    /// Close every entry (settling all) and clear the map.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut entries = self.entries.write().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };

        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        let mut tasks = Vec::with_capacity(count);
        for entry in drained {
            tasks.push(tokio::spawn(async move {
                close_entry(&entry).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        info!(closed = count, "Closed all pooled connections");
    }

    /// Cancel the sweeper, then close everything. No entry outlives this.
    pub async fn destroy(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.sweeper.lock().unwrap().take() {
            task.abort();
        }
        self.close_all().await;
    }

    /// Snapshot of all entries.
    pub async fn info(&self) -> Vec<PooledConnectionInfo> {
        let entries = self.entries.read().await;
        let now = Utc::now();
        entries
            .values()
            .map(|entry| PooledConnectionInfo {
                session_id: entry.session_id.clone(),
                resource_type: entry.kind,
                created_at: entry.created_at,
                last_used: now
                    - chrono::Duration::from_std(entry.idle_for())
                        .unwrap_or_else(|_| chrono::Duration::zero()),
            })
            .collect()
    }

    /// Number of pooled connections.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the pool holds no connections.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn lookup(&self, session_id: &str) -> Option<Arc<PooledConnection>> {
        let entries = self.entries.read().await;
        entries.get(session_id).cloned()
    }

    fn start_sweeper(
        pool: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pool.sweep_idle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Pool sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Close every entry idle for longer than `max_idle`.
    async fn sweep_idle(&self) {
        let expired: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| entry.idle_for() > self.max_idle)
                .map(|entry| entry.session_id.clone())
                .collect()
        };

        for session_id in expired {
            info!(
                session_id = %session_id,
                max_idle_secs = self.max_idle.as_secs(),
                "Evicting idle pooled connection"
            );
            self.close(&session_id).await;
        }
    }

    #[cfg(test)]
    async fn insert_stub(&self, session_id: &str, kind: DatabaseKind) -> Arc<PooledConnection> {
        let entry = Arc::new(PooledConnection {
            session_id: session_id.to_string(),
            kind,
            created_at: Utc::now(),
            last_used: StdMutex::new(Instant::now()),
            conn: Mutex::new(None),
        });
        let mut entries = self.entries.write().await;
        entries.insert(session_id.to_string(), Arc::clone(&entry));
        entry
    }
}

/// Tear one entry's driver connection down; errors are swallowed.
async fn close_entry(entry: &PooledConnection) {
    let conn = {
        let mut guard = entry.conn.lock().await;
        guard.take()
    };

    match conn {
        Some(DriverConnection::Postgres { client, io_task }) => {
            drop(client);
            io_task.abort();
        }
        Some(DriverConnection::MySql(conn)) => {
            if let Err(e) = conn.disconnect().await {
                debug!(error = %e, "MySQL pooled disconnect failed");
            }
        }
        None => {}
    }
}

/// Open a direct driver connection with the session's credentials.
async fn open_driver(credentials: &DatabaseCredentials) -> Result<DriverConnection> {
    match credentials.kind {
        DatabaseKind::Postgres => open_postgres(credentials).await,
        DatabaseKind::MySql => open_mysql(credentials).await,
    }
}

async fn open_postgres(credentials: &DatabaseCredentials) -> Result<DriverConnection> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&credentials.host)
        .port(credentials.port)
        .user(&credentials.username)
        .password(&credentials.password)
        .dbname(&credentials.database)
        .connect_timeout(DRIVER_CONNECT_TIMEOUT);

    if credentials.ssl_enabled {
        config.ssl_mode(tokio_postgres::config::SslMode::Require);
        let tls_config = tls::database_client_config(
            credentials.ssl_certificate.as_deref(),
            credentials.ssl_reject_unauthorized,
        )?;
        let connector = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
        let (client, connection) = timeout(DRIVER_CONNECT_TIMEOUT, config.connect(connector))
            .await
            .map_err(|_| connect_timeout_error())?
            .map_err(|e| BrokerError::Driver(e.to_string()))?;
        let io_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Pooled postgres connection ended with error");
            }
        });
        Ok(DriverConnection::Postgres { client, io_task })
    } else {
        config.ssl_mode(tokio_postgres::config::SslMode::Disable);
        let (client, connection) = timeout(DRIVER_CONNECT_TIMEOUT, config.connect(NoTls))
            .await
            .map_err(|_| connect_timeout_error())?
            .map_err(|e| BrokerError::Driver(e.to_string()))?;
        let io_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Pooled postgres connection ended with error");
            }
        });
        Ok(DriverConnection::Postgres { client, io_task })
    }
}

async fn open_mysql(credentials: &DatabaseCredentials) -> Result<DriverConnection> {
    let ssl_opts = if credentials.ssl_enabled {
        let mut ssl = mysql_async::SslOpts::default();
        if let Some(pem) = &credentials.ssl_certificate {
            ssl = ssl.with_root_certs(vec![pem.clone().into_bytes().into()]);
        }
        if !credentials.ssl_reject_unauthorized {
            ssl = ssl
                .with_danger_accept_invalid_certs(true)
                .with_danger_skip_domain_validation(true);
        }
        Some(ssl)
    } else {
        // SSL option absent entirely when disabled
        None
    };

    let opts: mysql_async::Opts = mysql_async::OptsBuilder::default()
        .ip_or_hostname(credentials.host.clone())
        .tcp_port(credentials.port)
        .user(Some(credentials.username.clone()))
        .pass(Some(credentials.password.clone()))
        .db_name(Some(credentials.database.clone()))
        .prefer_socket(false)
        .ssl_opts(ssl_opts)
        .into();

    let conn = timeout(DRIVER_CONNECT_TIMEOUT, mysql_async::Conn::new(opts))
        .await
        .map_err(|_| connect_timeout_error())?
        .map_err(|e| BrokerError::Driver(e.to_string()))?;

    Ok(DriverConnection::MySql(conn))
}

fn connect_timeout_error() -> BrokerError {
    BrokerError::Driver(format!(
        "Database connection timed out after {:?}",
        DRIVER_CONNECT_TIMEOUT
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_pool() -> Arc<ConnectionPool> {
        ConnectionPool::new(&PoolConfig {
            max_idle_secs: 1,
            health_check_interval_secs: 1,
        })
    }

    fn pool_with(max_idle: Duration, interval: Duration) -> Arc<ConnectionPool> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let pool = Arc::new(ConnectionPool {
            entries: RwLock::new(HashMap::new()),
            max_idle,
            shutdown_tx,
            sweeper: StdMutex::new(None),
        });
        let task = ConnectionPool::start_sweeper(Arc::clone(&pool), interval, shutdown_rx);
        *pool.sweeper.lock().unwrap() = Some(task);
        pool
    }

    #[tokio::test]
    async fn test_get_missing_session_fails() {
        let pool = fast_pool();
        let err = pool.get("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "No connection found for session.");
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_stub_entry_roundtrip() {
        let pool = fast_pool();
        let inserted = pool.insert_stub("s1", DatabaseKind::Postgres).await;
        let fetched = pool.get("s1").await.unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_last_used_monotone() {
        let pool = fast_pool();
        let entry = pool.insert_stub("s1", DatabaseKind::Postgres).await;

        let before = *entry.last_used.lock().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release("s1").await;
        let after = *entry.last_used.lock().unwrap();
        assert!(after >= before);

        pool.get("s1").await.unwrap();
        let again = *entry.last_used.lock().unwrap();
        assert!(again >= after);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_close_removes_entry() {
        let pool = fast_pool();
        pool.insert_stub("s1", DatabaseKind::MySql).await;
        assert_eq!(pool.len().await, 1);

        pool.close("s1").await;
        assert!(pool.is_empty().await);
        // Idempotent
        pool.close("s1").await;
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_idle_eviction() {
        // max_idle 50ms, sweep every 20ms: after 200ms of inactivity the
        // entry must be gone.
        let pool = pool_with(Duration::from_millis(50), Duration::from_millis(20));
        pool.insert_stub("s1", DatabaseKind::Postgres).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            pool.info().await.iter().all(|i| i.session_id != "s1"),
            "idle entry should have been evicted"
        );
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_touch_defers_eviction() {
        let pool = pool_with(Duration::from_millis(120), Duration::from_millis(20));
        pool.insert_stub("s1", DatabaseKind::Postgres).await;

        // Keep touching under the idle threshold; the entry must survive.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            pool.release("s1").await;
        }
        assert_eq!(pool.len().await, 1);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_health_check_missing_session_is_false() {
        let pool = fast_pool();
        assert!(!pool.health_check("absent").await);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_health_check_dead_entry_evicts() {
        let pool = fast_pool();
        // Stub entry has no driver connection, which probes as unhealthy.
        pool.insert_stub("s1", DatabaseKind::Postgres).await;
        assert!(!pool.health_check("s1").await);
        assert!(pool.is_empty().await);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_close_all_clears_everything() {
        let pool = fast_pool();
        pool.insert_stub("s1", DatabaseKind::Postgres).await;
        pool.insert_stub("s2", DatabaseKind::MySql).await;

        pool.close_all().await;
        assert!(pool.is_empty().await);
        // Repeat is a safe no-op
        pool.close_all().await;
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_stops_sweeper_and_clears() {
        let pool = pool_with(Duration::from_millis(50), Duration::from_millis(20));
        pool.insert_stub("s1", DatabaseKind::Postgres).await;

        pool.destroy().await;
        assert!(pool.is_empty().await);

        // Inserting after destroy must not be resurrected by a sweeper
        // tick (the sweeper is gone); entry simply sits there.
        pool.insert_stub("s2", DatabaseKind::Postgres).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_info_snapshot_shape() {
        let pool = fast_pool();
        pool.insert_stub("s1", DatabaseKind::MySql).await;

        let info = pool.info().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].session_id, "s1");
        assert_eq!(info[0].resource_type, DatabaseKind::MySql);
        assert!(info[0].last_used >= info[0].created_at - chrono::Duration::seconds(1));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_create_refused_connection_is_driver_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pool = fast_pool();
        let credentials = DatabaseCredentials {
            kind: DatabaseKind::Postgres,
            host: "127.0.0.1".to_string(),
            port,
            database: "app".to_string(),
            username: "svc".to_string(),
            password: "pw".to_string(),
            ssl_enabled: false,
            ssl_reject_unauthorized: true,
            ssl_certificate: None,
        };
        let err = pool.create("s1", &credentials).await.unwrap_err();
        assert!(matches!(err, BrokerError::Driver(_)));
        assert!(pool.is_empty().await);
        pool.destroy().await;
    }
}
