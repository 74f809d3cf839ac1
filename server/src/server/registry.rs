//! Connection Registry
//!
//! Tracks every live transport connection and its claimed identity. All
//! connection bookkeeping funnels through here; the per-connection kill
//! handle is the only way a Heartbeat Monitor forces a disconnect.

use crate::protocol::ServerMessage;
use crate::session::state::now_millis;
use metrics::counter;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

/// State for a single live transport connection
pub struct ConnectionRecord {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub connected_at: u64,
    pub client_addr: IpAddr,
    pub last_heartbeat: Instant,
    pub sender: mpsc::Sender<ServerMessage>,
    pub kill: Arc<Notify>,
}

/// Registry of live connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionRecord>>,
    total_registered: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly upgraded connection. Returns the kill handle the
    /// socket loop must select on; the caller spawns the Heartbeat Monitor
    /// for the connection right after.
    pub async fn register(
        &self,
        id: Uuid,
        user_hint: Option<String>,
        session_hint: Option<String>,
        client_addr: IpAddr,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Arc<Notify> {
        let kill = Arc::new(Notify::new());
        let record = ConnectionRecord {
            id,
            user_id: user_hint,
            session_id: session_hint,
            connected_at: now_millis(),
            client_addr,
            last_heartbeat: Instant::now(),
            sender,
            kill: kill.clone(),
        };

        let mut connections = self.connections.write().await;
        connections.insert(id, record);
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        counter!("pairquiz_connections_total").increment(1);
        info!("Client connected: {} ({})", id, client_addr);
        kill
    }

    /// Remove a connection; returns the session it belonged to, if any, so
    /// the caller can notify the coordinator. Invoked exactly once, from
    /// the socket task's cleanup path.
    pub async fn unregister(&self, id: Uuid) -> Option<String> {
        let mut connections = self.connections.write().await;
        let record = connections.remove(&id)?;
        info!(
            "Client disconnected: {} (user: {})",
            id,
            record.user_id.as_deref().unwrap_or("unknown")
        );
        record.session_id
    }

    /// Refresh the liveness timestamp; any inbound frame counts as life
    pub async fn touch(&self, id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(record) = connections.get_mut(&id) {
            record.last_heartbeat = Instant::now();
        }
    }

    /// Bind the connection to a session after a successful join
    pub async fn set_session(&self, id: Uuid, session_id: &str, user_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(record) = connections.get_mut(&id) {
            record.session_id = Some(session_id.to_string());
            record.user_id = Some(user_id.to_string());
        }
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(&id)
    }

    /// Time since the connection last showed life; None if unregistered
    pub async fn idle_for(&self, id: Uuid) -> Option<Duration> {
        let connections = self.connections.read().await;
        connections.get(&id).map(|r| r.last_heartbeat.elapsed())
    }

    /// Fire the connection's kill handle; the socket loop observes it and
    /// tears the transport down through the normal cleanup path.
    pub async fn kill(&self, id: Uuid) {
        let connections = self.connections.read().await;
        if let Some(record) = connections.get(&id) {
            debug!("Forcing disconnect for {}", id);
            record.kill.notify_one();
        }
    }

    pub async fn len(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total connections ever registered
    pub fn total_registered(&self) -> u64 {
        self.total_registered.load(Ordering::Relaxed)
    }
}
