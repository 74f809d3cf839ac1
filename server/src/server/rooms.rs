//! Pub/sub broadcast groups keyed by session id.
//!
//! A room is the set of live connections attached to a session; it is the
//! broadcast scope for state updates. The transport layer stays decoupled
//! from session semantics: the coordinator subscribes a connection on join
//! and unsubscribes it on leave/disconnect.

use crate::protocol::ServerMessage;
use dashmap::DashMap;
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
pub struct Rooms {
    rooms: DashMap<String, HashMap<Uuid, mpsc::Sender<ServerMessage>>>,
    dropped: AtomicU64,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a session's broadcast group
    pub fn join(&self, session_id: &str, connection_id: Uuid, sender: mpsc::Sender<ServerMessage>) {
        self.rooms
            .entry(session_id.to_string())
            .or_default()
            .insert(connection_id, sender);
    }

    /// Unsubscribe a connection; drops the room once empty
    pub fn leave(&self, session_id: &str, connection_id: Uuid) {
        let mut drop_room = false;
        if let Some(mut members) = self.rooms.get_mut(session_id) {
            members.remove(&connection_id);
            drop_room = members.is_empty();
        }
        if drop_room {
            self.rooms.remove(session_id);
        }
    }

    /// Drop a whole broadcast group
    pub fn remove(&self, session_id: &str) {
        self.rooms.remove(session_id);
    }

    pub fn member_count(&self, session_id: &str) -> usize {
        self.rooms.get(session_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Broadcast to every room member
    pub fn broadcast(&self, session_id: &str, message: ServerMessage) {
        self.fan_out(session_id, None, message);
    }

    /// Broadcast to every room member except the originating connection
    pub fn broadcast_except(&self, session_id: &str, except: Uuid, message: ServerMessage) {
        self.fan_out(session_id, Some(except), message);
    }

    /// Send to a single room member
    pub fn send_to(&self, session_id: &str, connection_id: Uuid, message: ServerMessage) {
        let sender = self
            .rooms
            .get(session_id)
            .and_then(|members| members.get(&connection_id).cloned());
        if let Some(sender) = sender {
            self.deliver(&sender, connection_id, message);
        }
    }

    /// Frames dropped because a receiver's outbound queue was full
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn fan_out(&self, session_id: &str, except: Option<Uuid>, message: ServerMessage) {
        // Collect senders before delivering so no shard guard is held
        // while interacting with the channels.
        let members: Vec<(Uuid, mpsc::Sender<ServerMessage>)> = match self.rooms.get(session_id) {
            Some(members) => members
                .iter()
                .filter(|(id, _)| Some(**id) != except)
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            None => return,
        };

        counter!("pairquiz_broadcasts_total", "event" => message.message_type()).increment(1);

        for (connection_id, sender) in members {
            self.deliver(&sender, connection_id, message.clone());
        }
    }

    // Best-effort delivery: a slow consumer loses frames rather than
    // stalling the session's event processing.
    fn deliver(
        &self,
        sender: &mpsc::Sender<ServerMessage>,
        connection_id: Uuid,
        message: ServerMessage,
    ) {
        match sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("pairquiz_dropped_messages_total").increment(1);
                warn!(
                    "Outbound queue full for {}, dropping {}",
                    connection_id,
                    msg.message_type()
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound channel closed for {}", connection_id);
            }
        }
    }
}
