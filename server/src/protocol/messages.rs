use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Client to Server events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a paired-quiz session (role assigned server-side)
    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: String, user_id: String },
    /// Report an answer selection for a question
    #[serde(rename_all = "camelCase")]
    AnswerSelected {
        session_id: String,
        user_id: String,
        question_index: u32,
        selected_option: String,
    },
    /// Navigate the session to a question
    #[serde(rename_all = "camelCase")]
    NextQuestion {
        session_id: String,
        question_index: u32,
    },
    /// Report quiz completion with the final score
    #[serde(rename_all = "camelCase")]
    QuizComplete {
        session_id: String,
        user_id: String,
        score: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_taken: Option<u64>,
    },
    /// Sync the shared countdown timer
    #[serde(rename_all = "camelCase")]
    UpdateTimer {
        session_id: String,
        timer_seconds: u32,
    },
    /// Cancel the session for both participants
    #[serde(rename_all = "camelCase")]
    CancelSession {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Liveness signal; answered with `heartbeat_ack`
    #[serde(rename_all = "camelCase")]
    Heartbeat { client_time: u64 },
    /// Diagnostics counters
    GetMetrics,
}

/// Server to Client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Ack of transport connect
    #[serde(rename_all = "camelCase")]
    Connected {
        sid: Uuid,
        server_time: u64,
        features: Vec<String>,
    },
    /// Sent to the joining connection only
    #[serde(rename_all = "camelCase")]
    SessionJoined {
        session_id: String,
        role: Role,
        session: SessionSnapshot,
    },
    /// Room broadcast once both roles are attached
    #[serde(rename_all = "camelCase")]
    PartnerJoined {
        message: String,
        session: SessionSnapshot,
        timestamp: u64,
    },
    /// Room broadcast carrying a state mutation
    #[serde(rename_all = "camelCase")]
    StateUpdate {
        #[serde(flatten)]
        update: StateUpdate,
        timestamp: u64,
    },
    /// Sent to the surviving participant when the other side drops
    #[serde(rename_all = "camelCase")]
    PartnerDisconnected {
        message: String,
        session_id: String,
        timestamp: u64,
    },
    /// Reply to a client heartbeat, latency in milliseconds
    #[serde(rename_all = "camelCase")]
    HeartbeatAck {
        server_time: u64,
        client_time: u64,
        latency: u64,
    },
    /// Sent to the originating connection only
    Error {
        #[serde(rename = "type")]
        kind: ErrorKind,
        message: String,
    },
    /// Diagnostics counters reply
    Metrics {
        #[serde(flatten)]
        snapshot: MetricsSnapshot,
    },
}

/// State mutation kinds broadcast to a session room.
///
/// Flattened into the `state_update` frame so the wire shape is
/// `{ "event": "state_update", "type": "ANSWER_SELECTED", ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateUpdate {
    #[serde(rename_all = "camelCase")]
    PartnerJoined { session: SessionSnapshot },
    #[serde(rename_all = "camelCase")]
    AnswerSelected {
        user_id: String,
        question_index: u32,
        selected_option: String,
    },
    #[serde(rename_all = "camelCase")]
    NextQuestion { question_index: u32 },
    #[serde(rename_all = "camelCase")]
    TimerUpdate { timer_seconds: u32 },
    #[serde(rename_all = "camelCase")]
    QuizComplete {
        user_id: String,
        score: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_taken: Option<u64>,
        both_completed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionSnapshot>,
    },
    #[serde(rename_all = "camelCase")]
    SessionCancelled { reason: String },
}

/// Machine-readable error categories surfaced on the `error` event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidData,
    SessionNotFound,
    SessionInactive,
    Unauthorized,
    JoinFailed,
}

/// Participant role, assigned by matching the claimed user id against the
/// session's designated identities
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Partner,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Host => Role::Partner,
            Role::Partner => Role::Host,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Partner => write!(f, "partner"),
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses accept no further mutation
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

/// Full session state for transfer to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub host_user_id: String,
    pub partner_user_id: Option<String>,
    pub questions: Vec<serde_json::Value>,
    pub current_question_index: u32,
    pub host_answers: BTreeMap<u32, String>,
    pub partner_answers: BTreeMap<u32, String>,
    pub host_score: Option<u32>,
    pub partner_score: Option<u32>,
    pub host_time_taken: Option<u64>,
    pub partner_time_taken: Option<u64>,
    pub timer_seconds: u32,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

/// Diagnostics counters returned by the `metrics` event and `/metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_sessions: u64,
    pub active_sessions: usize,
    pub errors: u64,
    pub reconnections: u64,
    pub rate_limited: u64,
    pub dropped_messages: u64,
    pub timestamp: u64,
}

impl ClientMessage {
    /// Get the event name for metrics labels
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::JoinSession { .. } => "join_session",
            ClientMessage::AnswerSelected { .. } => "answer_selected",
            ClientMessage::NextQuestion { .. } => "next_question",
            ClientMessage::QuizComplete { .. } => "quiz_complete",
            ClientMessage::UpdateTimer { .. } => "update_timer",
            ClientMessage::CancelSession { .. } => "cancel_session",
            ClientMessage::Heartbeat { .. } => "heartbeat",
            ClientMessage::GetMetrics => "get_metrics",
        }
    }
}

impl ServerMessage {
    /// Get the event name for metrics labels
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::SessionJoined { .. } => "session_joined",
            ServerMessage::PartnerJoined { .. } => "partner_joined",
            ServerMessage::StateUpdate { .. } => "state_update",
            ServerMessage::PartnerDisconnected { .. } => "partner_disconnected",
            ServerMessage::HeartbeatAck { .. } => "heartbeat_ack",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Metrics { .. } => "metrics",
        }
    }
}
