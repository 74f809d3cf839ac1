//! WebSocket transport
//!
//! One task pair per connection: the read loop parses frames and hands them
//! to the Event Router; a forwarder task drains the outbound queue into the
//! socket. All teardown funnels through a single cleanup path at the bottom
//! of `handle_socket`, so the registry observes exactly one unregister per
//! connection whether the client closed, the transport errored, or the
//! Heartbeat Monitor fired the kill handle.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::{AppState, events, heartbeat};
use crate::session::state::now_millis;
use axum::{
    extract::{
        ConnectInfo, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outbound frames queued per connection before drops kick in
const OUTBOUND_QUEUE: usize = 64;

const FEATURES: &[&str] = &["pair_quiz", "realtime_sync", "heartbeat"];

/// WebSocket upgrade handler; the Rate Limiter gates the upgrade before the
/// Connection Registry ever sees the attempt
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if !state.rate_limiter.admit(addr.ip()) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let user_hint = params.get("userId").cloned();
    let session_hint = params.get("sessionId").cloned();
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, user_hint, session_hint))
}

/// Handle a WebSocket connection for its whole lifetime
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    addr: SocketAddr,
    user_hint: Option<String>,
    session_hint: Option<String>,
) {
    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    let kill = state
        .registry
        .register(connection_id, user_hint, session_hint, addr.ip(), tx.clone())
        .await;
    heartbeat::spawn_monitor(state.registry.clone(), connection_id, state.heartbeat.clone());

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward outbound messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    let _ = tx
        .send(ServerMessage::Connected {
            sid: connection_id,
            server_time: now_millis(),
            features: FEATURES.iter().map(|s| s.to_string()).collect(),
        })
        .await;

    loop {
        tokio::select! {
            _ = kill.notified() => {
                info!("Connection {} force-closed by heartbeat monitor", connection_id);
                break;
            }
            incoming = ws_receiver.next() => {
                let Some(result) = incoming else { break };
                match result {
                    Ok(Message::Text(text)) => {
                        state.registry.touch(connection_id).await;
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => events::dispatch(msg, connection_id, &state, &tx).await,
                            Err(e) => {
                                warn!("Failed to parse client message from {}: {}", connection_id, e);
                                events::send_invalid_data(
                                    &state,
                                    &tx,
                                    format!("Invalid message format: {}", e),
                                )
                                .await;
                            }
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        state.registry.touch(connection_id).await;
                    }
                    Ok(Message::Ping(_)) => {
                        // axum answers pings automatically
                        state.registry.touch(connection_id).await;
                    }
                    Ok(Message::Binary(_)) => {
                        debug!("Ignoring binary frame from {}", connection_id);
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client {} requested close", connection_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error for {}: {}", connection_id, e);
                        break;
                    }
                }
            }
        }
    }

    send_task.abort();

    // Single cleanup path: the heartbeat monitor exits on its own once the
    // connection is gone from the registry.
    if let Some(session_id) = state.registry.unregister(connection_id).await {
        state.coordinator.leave(&session_id, connection_id).await;
    }

    info!("WebSocket connection closed: {}", connection_id);
}
