//! Event Router
//!
//! Stateless dispatch layer between parsed wire events and the Session
//! Coordinator. Each inbound event maps to exactly one coordinator or
//! registry call; every predictable failure is converted into a single
//! `error` event for the originating connection and never reaches the
//! transport layer.

use crate::protocol::{ClientMessage, ErrorKind, ServerMessage};
use crate::server::AppState;
use crate::session::coordinator::SessionError;
use crate::session::state::now_millis;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Handle one parsed client event
pub async fn dispatch(
    msg: ClientMessage,
    connection_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) {
    counter!("pairquiz_events_total", "event" => msg.message_type()).increment(1);

    match msg {
        ClientMessage::Heartbeat { client_time } => {
            state.registry.touch(connection_id).await;
            let server_time = now_millis();
            let _ = tx
                .send(ServerMessage::HeartbeatAck {
                    server_time,
                    client_time,
                    latency: server_time.saturating_sub(client_time),
                })
                .await;
        }

        ClientMessage::JoinSession {
            session_id,
            user_id,
        } => {
            match state
                .coordinator
                .join(&session_id, connection_id, &user_id, tx.clone())
                .await
            {
                Ok(outcome) => {
                    state
                        .registry
                        .set_session(connection_id, &session_id, &user_id)
                        .await;
                    debug!(
                        "Connection {} bound to session {} as {}",
                        connection_id, session_id, outcome.role
                    );
                }
                Err(e) => send_error(state, tx, e).await,
            }
        }

        ClientMessage::AnswerSelected {
            session_id,
            user_id,
            question_index,
            selected_option,
        } => {
            if let Err(e) = state
                .coordinator
                .record_answer(
                    &session_id,
                    connection_id,
                    &user_id,
                    question_index,
                    &selected_option,
                )
                .await
            {
                send_error(state, tx, e).await;
            }
        }

        ClientMessage::NextQuestion {
            session_id,
            question_index,
        } => {
            if let Err(e) = state
                .coordinator
                .advance_question(&session_id, connection_id, question_index)
                .await
            {
                send_error(state, tx, e).await;
            }
        }

        ClientMessage::QuizComplete {
            session_id,
            user_id,
            score,
            time_taken,
        } => {
            if let Err(e) = state
                .coordinator
                .complete(&session_id, connection_id, &user_id, score, time_taken)
                .await
            {
                send_error(state, tx, e).await;
            }
        }

        ClientMessage::UpdateTimer {
            session_id,
            timer_seconds,
        } => {
            if let Err(e) = state
                .coordinator
                .update_timer(&session_id, connection_id, timer_seconds)
                .await
            {
                send_error(state, tx, e).await;
            }
        }

        ClientMessage::CancelSession { session_id, reason } => {
            if let Err(e) = state
                .coordinator
                .cancel(&session_id, connection_id, reason)
                .await
            {
                send_error(state, tx, e).await;
            }
        }

        ClientMessage::GetMetrics => {
            let snapshot = state.metrics_snapshot().await;
            let _ = tx.send(ServerMessage::Metrics { snapshot }).await;
        }
    }
}

/// Reply to an unparseable frame
pub async fn send_invalid_data(
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
    message: String,
) {
    state.count_error();
    counter!("pairquiz_errors_total", "kind" => kind_label(ErrorKind::InvalidData)).increment(1);
    let _ = tx
        .send(ServerMessage::Error {
            kind: ErrorKind::InvalidData,
            message,
        })
        .await;
}

async fn send_error(state: &AppState, tx: &mpsc::Sender<ServerMessage>, err: SessionError) {
    let kind = err.kind();
    state.count_error();
    counter!("pairquiz_errors_total", "kind" => kind_label(kind)).increment(1);
    let _ = tx
        .send(ServerMessage::Error {
            kind,
            message: err.to_string(),
        })
        .await;
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidData => "invalid_data",
        ErrorKind::SessionNotFound => "session_not_found",
        ErrorKind::SessionInactive => "session_inactive",
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::JoinFailed => "join_failed",
    }
}
