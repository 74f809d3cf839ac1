use crate::protocol::{Role, SessionSnapshot, SessionStatus};
use crate::session::store::SessionRecord;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Session ID: issued by the session-creation collaborator, opaque here
pub type SessionId = String;

/// Live session state owned by the coordinator.
///
/// Mirrors the durable record plus the connection-attachment state that only
/// exists while the session is resident in memory.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,

    // Designated identities (durable record is the sole writer)
    pub host_user_id: String,
    pub partner_user_id: Option<String>,

    // Attachment slots
    pub host_connection_id: Option<Uuid>,
    pub partner_connection_id: Option<Uuid>,
    pub participants: HashSet<Uuid>,

    // Quiz state
    pub questions: Vec<serde_json::Value>,
    pub current_question_index: u32,
    pub host_answers: BTreeMap<u32, String>,
    pub partner_answers: BTreeMap<u32, String>,
    pub host_score: Option<u32>,
    pub partner_score: Option<u32>,
    pub host_time_taken: Option<u64>,
    pub partner_time_taken: Option<u64>,
    pub timer_seconds: u32,

    // Timestamps (epoch millis)
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,

    /// When the coordinator pulled the record into memory; staleness basis
    /// for the cleanup sweep
    pub loaded_at: Instant,
}

impl Session {
    /// Build live state from the durable record
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            id: record.session_id,
            status: record.status,
            host_user_id: record.host_user_id,
            partner_user_id: record.partner_user_id,
            host_connection_id: None,
            partner_connection_id: None,
            participants: HashSet::new(),
            questions: record.questions,
            current_question_index: record.current_question_index,
            host_answers: record.host_answers,
            partner_answers: record.partner_answers,
            host_score: record.host_score,
            partner_score: record.partner_score,
            host_time_taken: record.host_time_taken,
            partner_time_taken: record.partner_time_taken,
            timer_seconds: record.timer_seconds,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            loaded_at: Instant::now(),
        }
    }

    /// Resolve the role for a claimed user id.
    ///
    /// The host identity wins ties: a record whose partner equals its host
    /// can only ever attach a host.
    pub fn role_for(&self, user_id: &str) -> Option<Role> {
        if user_id == self.host_user_id {
            Some(Role::Host)
        } else if self.partner_user_id.as_deref() == Some(user_id) {
            Some(Role::Partner)
        } else {
            None
        }
    }

    /// Occupy a role slot and add the connection to the room participants.
    /// Returns the connection id the slot previously held, if any.
    pub fn attach(&mut self, role: Role, connection_id: Uuid) -> Option<Uuid> {
        self.participants.insert(connection_id);
        match role {
            Role::Host => self.host_connection_id.replace(connection_id),
            Role::Partner => self.partner_connection_id.replace(connection_id),
        }
    }

    /// Remove a connection; vacates the matching role slot.
    /// Returns the role the connection held, if any.
    pub fn detach(&mut self, connection_id: Uuid) -> Option<Role> {
        self.participants.remove(&connection_id);
        if self.host_connection_id == Some(connection_id) {
            self.host_connection_id = None;
            Some(Role::Host)
        } else if self.partner_connection_id == Some(connection_id) {
            self.partner_connection_id = None;
            Some(Role::Partner)
        } else {
            None
        }
    }

    pub fn both_attached(&self) -> bool {
        self.host_connection_id.is_some() && self.partner_connection_id.is_some()
    }

    pub fn is_participant(&self, connection_id: Uuid) -> bool {
        self.participants.contains(&connection_id)
    }

    pub fn answers_mut(&mut self, role: Role) -> &mut BTreeMap<u32, String> {
        match role {
            Role::Host => &mut self.host_answers,
            Role::Partner => &mut self.partner_answers,
        }
    }

    pub fn both_completed(&self) -> bool {
        self.host_score.is_some() && self.partner_score.is_some()
    }

    /// Full state for transfer to clients
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            status: self.status,
            host_user_id: self.host_user_id.clone(),
            partner_user_id: self.partner_user_id.clone(),
            questions: self.questions.clone(),
            current_question_index: self.current_question_index,
            host_answers: self.host_answers.clone(),
            partner_answers: self.partner_answers.clone(),
            host_score: self.host_score,
            partner_score: self.partner_score,
            host_time_taken: self.host_time_taken,
            partner_time_taken: self.partner_time_taken,
            timer_seconds: self.timer_seconds,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the cleanup sweeper runs
    pub sweep_interval: Duration,
    /// Minimum in-memory age before an empty session may be evicted
    pub stale_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5 * 60),
            stale_after: Duration::from_secs(60 * 60),
        }
    }
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
