//! Registry of live tunnel handles, keyed by session id.
//!
//! The registry is the single owner of tunnel teardown: handles are
//! registered by the pipeline, superseded when a session builds a second
//! tunnel, and destroyed on explicit disconnect or broker shutdown. At most
//! one active handle exists per session at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::bridge::LocalBridge;

/// A registered tunnel: the bridge task owns both TLS streams; closing the
/// handle aborts that task, destroying inner then outer stream.
pub struct TunnelHandle {
    session_id: String,
    id: Uuid,
    active: AtomicBool,
    bridge: LocalBridge,
}

impl TunnelHandle {
    /// Wrap a live bridge for the given session.
    pub fn new(session_id: impl Into<String>, bridge: LocalBridge) -> Self {
        Self {
            session_id: session_id.into(),
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            bridge,
        }
    }

    /// The session this tunnel belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The loopback port the driver connects to.
    pub fn local_port(&self) -> u16 {
        self.bridge.port()
    }

    /// Whether the tunnel has not been torn down yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Take the bridge's pre-accept listener failure, if one was recorded.
    pub fn take_bridge_failure(&self) -> Option<std::io::Error> {
        self.bridge.take_accept_failure()
    }

    /// Mark inactive and destroy the streams. Idempotent; teardown errors
    /// are swallowed.
    fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.bridge.close();
            debug!(
                session_id = %self.session_id,
                tunnel_id = %self.id,
                "Tunnel closed"
            );
        }
    }
}

/// Read-only snapshot row for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSummary {
    pub session_id: String,
    pub active: bool,
}

/// Per-broker-instance map of sessionId → active tunnel handle.
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<String, Arc<TunnelHandle>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    /// Create a shared instance wrapped in Arc.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a handle for its session.
    ///
    /// If a prior handle exists for the same session it is torn down first;
    /// the new handle supersedes it.
    pub async fn register(&self, handle: TunnelHandle) -> Arc<TunnelHandle> {
        let session_id = handle.session_id().to_string();
        let handle = Arc::new(handle);

        let previous = {
            let mut tunnels = self.tunnels.write().await;
            tunnels.insert(session_id.clone(), Arc::clone(&handle))
        };

        if let Some(previous) = previous {
            warn!(
                session_id = %session_id,
                superseded = %previous.id,
                "Superseding existing tunnel for session"
            );
            previous.close();
        }

        handle
    }

    /// Close and remove the tunnel for one session. Idempotent.
    ///
    /// Returns true when a tunnel was present.
    pub async fn close_one(&self, session_id: &str) -> bool {
        let removed = {
            let mut tunnels = self.tunnels.write().await;
            tunnels.remove(session_id)
        };

        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Close every tunnel. Safe to call repeatedly; each entry settles
    /// individually and teardown errors are ignored.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut tunnels = self.tunnels.write().await;
            tunnels.drain().collect()
        };

        let count = drained.len();
        for (_, handle) in drained {
            handle.close();
        }

        if count > 0 {
            info!(closed = count, "Closed all tunnels");
        }
        count
    }

    /// Snapshot of `{session_id, active}` pairs.
    pub async fn list(&self) -> Vec<TunnelSummary> {
        let tunnels = self.tunnels.read().await;
        tunnels
            .values()
            .map(|h| TunnelSummary {
                session_id: h.session_id().to_string(),
                active: h.is_active(),
            })
            .collect()
    }

    /// Number of registered tunnels.
    pub async fn active_count(&self) -> usize {
        let tunnels = self.tunnels.read().await;
        tunnels.len()
    }

    /// Whether a session currently has a registered tunnel.
    pub async fn contains(&self, session_id: &str) -> bool {
        let tunnels = self.tunnels.read().await;
        tunnels.contains_key(session_id)
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
