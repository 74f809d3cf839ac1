//! Heartbeat Monitor
//!
//! One watchdog task per connection. A connection that shows no life for
//! longer than the configured timeout is forcibly disconnected through its
//! kill handle; the socket loop then funnels into the normal cleanup path,
//! so `unregister` is observed exactly once. The task exits on its own once
//! the connection is unregistered.

use crate::server::registry::ConnectionRegistry;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Heartbeat monitoring configuration
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Silence longer than this forces a disconnect
    pub timeout: Duration,
    /// How often the watchdog checks
    pub check_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Spawn the watchdog for a connection
pub fn spawn_monitor(
    registry: Arc<ConnectionRegistry>,
    connection_id: Uuid,
    config: HeartbeatConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.check_interval);
        loop {
            interval.tick().await;

            match registry.idle_for(connection_id).await {
                None => {
                    // Connection unregistered; the watchdog dies with it
                    debug!("Heartbeat monitor for {} exiting", connection_id);
                    break;
                }
                Some(idle) if idle > config.timeout => {
                    warn!(
                        "Connection timeout for {} ({}s silent), disconnecting",
                        connection_id,
                        idle.as_secs()
                    );
                    counter!("pairquiz_heartbeat_timeouts_total").increment(1);
                    registry.kill(connection_id).await;
                    break;
                }
                Some(_) => {}
            }
        }
    })
}
