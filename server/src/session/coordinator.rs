//! Session Coordinator
//!
//! Owns all in-memory session state and the session state machine. Every
//! mutation for a given session runs under that session's lock, so two
//! operations on the same session queue rather than interleave, while
//! independent sessions proceed concurrently. The outer map lock is never
//! held across an await; durable-store I/O that does not need session state
//! (the initial load) happens before the session lock is taken.

use crate::protocol::{ErrorKind, Role, ServerMessage, SessionStatus, StateUpdate};
use crate::server::rooms::Rooms;
use crate::session::state::{Session, SessionConfig, SessionId, now_millis};
use crate::session::store::{SessionStore, StoreError};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Coordinator errors, converted to `error` wire events at the router
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session is not active")]
    Inactive,

    #[error("You are not authorized to join this session")]
    Unauthorized,

    #[error("Not a participant in this session")]
    NotParticipant,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Machine-readable category for the `error` event
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound(_) => ErrorKind::SessionNotFound,
            SessionError::Inactive => ErrorKind::SessionInactive,
            SessionError::Unauthorized | SessionError::NotParticipant => ErrorKind::Unauthorized,
            SessionError::Store(StoreError::NotFound(_)) => ErrorKind::SessionNotFound,
            SessionError::Store(_) => ErrorKind::JoinFailed,
        }
    }
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub role: Role,
}

/// Coordinates all live paired-quiz sessions
pub struct SessionCoordinator {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    rooms: Rooms,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    sessions_loaded: AtomicU64,
    reconnections: AtomicU64,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rooms: Rooms::new(),
            store,
            config,
            sessions_loaded: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
        }
    }

    /// Attach a connection to a session, assigning its role.
    ///
    /// Lazily loads the durable record on the session's first join. Sends
    /// `session_joined` to the joining connection; once both role slots are
    /// populated, transitions `waiting -> active` (first pairing only) and
    /// broadcasts `partner_joined` plus a PARTNER_JOINED state update to
    /// the whole room.
    pub async fn join(
        &self,
        session_id: &str,
        connection_id: Uuid,
        user_id: &str,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<JoinOutcome, SessionError> {
        counter!("pairquiz_session_joins_total").increment(1);

        let entry = match self.live(session_id).await {
            Some(entry) => entry,
            None => self.load(session_id).await?,
        };

        let mut session = entry.lock().await;
        if session.status.is_terminal() {
            return Err(SessionError::Inactive);
        }

        let role = session
            .role_for(user_id)
            .ok_or(SessionError::Unauthorized)?;

        let vacant_slot = match role {
            Role::Host => session.host_connection_id.is_none(),
            Role::Partner => session.partner_connection_id.is_none(),
        };
        if session.started_at.is_some() && vacant_slot {
            self.reconnections.fetch_add(1, Ordering::Relaxed);
            counter!("pairquiz_reconnections_total").increment(1);
            debug!("User {} reconnecting to session {}", user_id, session_id);
        }

        session.attach(role, connection_id);
        self.rooms.join(session_id, connection_id, sender);

        self.rooms.send_to(
            session_id,
            connection_id,
            ServerMessage::SessionJoined {
                session_id: session_id.to_string(),
                role,
                session: session.snapshot(),
            },
        );

        if session.both_attached() {
            if session.status == SessionStatus::Waiting {
                session.status = SessionStatus::Active;
                session.started_at = Some(now_millis());
                info!("Both users connected, session {} is active", session_id);
            }

            let snapshot = session.snapshot();
            let timestamp = now_millis();
            self.rooms.broadcast(
                session_id,
                ServerMessage::PartnerJoined {
                    message: "Your partner has joined!".to_string(),
                    session: snapshot.clone(),
                    timestamp,
                },
            );
            self.rooms.broadcast(
                session_id,
                ServerMessage::StateUpdate {
                    update: StateUpdate::PartnerJoined { session: snapshot },
                    timestamp,
                },
            );
        }

        info!(
            "User {} joined session {} as {}",
            user_id, session_id, role
        );
        Ok(JoinOutcome { role })
    }

    /// Record an answer selection; overwrite semantics per question index.
    /// Broadcast excludes the sender.
    pub async fn record_answer(
        &self,
        session_id: &str,
        connection_id: Uuid,
        user_id: &str,
        question_index: u32,
        selected_option: &str,
    ) -> Result<(), SessionError> {
        let entry = self.live(session_id).await.ok_or(SessionError::Inactive)?;
        let mut session = entry.lock().await;
        self.check_participant(&session, connection_id)?;

        let side = session
            .role_for(user_id)
            .ok_or(SessionError::Unauthorized)?;

        self.store
            .save_answer(session_id, side, question_index, selected_option)
            .await?;
        session
            .answers_mut(side)
            .insert(question_index, selected_option.to_string());

        self.rooms.broadcast_except(
            session_id,
            connection_id,
            ServerMessage::StateUpdate {
                update: StateUpdate::AnswerSelected {
                    user_id: user_id.to_string(),
                    question_index,
                    selected_option: selected_option.to_string(),
                },
                timestamp: now_millis(),
            },
        );

        info!(
            "Answer selected in session {}: Q{} = {}",
            session_id, question_index, selected_option
        );
        Ok(())
    }

    /// Set the current question; broadcast to the whole room including the
    /// sender (idempotent UI sync).
    pub async fn advance_question(
        &self,
        session_id: &str,
        connection_id: Uuid,
        question_index: u32,
    ) -> Result<(), SessionError> {
        let entry = self.live(session_id).await.ok_or(SessionError::Inactive)?;
        let mut session = entry.lock().await;
        self.check_participant(&session, connection_id)?;

        self.store
            .save_question_index(session_id, question_index)
            .await?;
        session.current_question_index = question_index;

        self.rooms.broadcast(
            session_id,
            ServerMessage::StateUpdate {
                update: StateUpdate::NextQuestion { question_index },
                timestamp: now_millis(),
            },
        );

        info!("Next question in session {}: Q{}", session_id, question_index);
        Ok(())
    }

    /// Sync the shared timer; broadcast excludes the sender
    pub async fn update_timer(
        &self,
        session_id: &str,
        connection_id: Uuid,
        timer_seconds: u32,
    ) -> Result<(), SessionError> {
        let entry = self.live(session_id).await.ok_or(SessionError::Inactive)?;
        let mut session = entry.lock().await;
        self.check_participant(&session, connection_id)?;

        self.store.save_timer(session_id, timer_seconds).await?;
        session.timer_seconds = timer_seconds;

        self.rooms.broadcast_except(
            session_id,
            connection_id,
            ServerMessage::StateUpdate {
                update: StateUpdate::TimerUpdate { timer_seconds },
                timestamp: now_millis(),
            },
        );
        Ok(())
    }

    /// Record one side's completion; once both sides have reported,
    /// transitions `active -> completed` and broadcasts the full snapshot.
    pub async fn complete(
        &self,
        session_id: &str,
        connection_id: Uuid,
        user_id: &str,
        score: u32,
        time_taken: Option<u64>,
    ) -> Result<(), SessionError> {
        let entry = self.live(session_id).await.ok_or(SessionError::Inactive)?;
        let mut session = entry.lock().await;
        self.check_participant(&session, connection_id)?;

        let side = session
            .role_for(user_id)
            .ok_or(SessionError::Unauthorized)?;

        self.store
            .save_completion(session_id, side, score, time_taken)
            .await?;
        match side {
            Role::Host => {
                session.host_score = Some(score);
                session.host_time_taken = time_taken;
            }
            Role::Partner => {
                session.partner_score = Some(score);
                session.partner_time_taken = time_taken;
            }
        }

        let both_completed = session.both_completed();
        if both_completed {
            session.status = SessionStatus::Completed;
            session.completed_at = Some(now_millis());
            counter!("pairquiz_sessions_completed_total").increment(1);
            info!("Session {} completed by both participants", session_id);
        }

        self.rooms.broadcast(
            session_id,
            ServerMessage::StateUpdate {
                update: StateUpdate::QuizComplete {
                    user_id: user_id.to_string(),
                    score,
                    time_taken,
                    both_completed,
                    session: both_completed.then(|| session.snapshot()),
                },
                timestamp: now_millis(),
            },
        );

        info!(
            "Quiz completed in session {} by {}: {}",
            session_id, user_id, score
        );
        Ok(())
    }

    /// Cancel the session for everyone. Terminal immediately; the session
    /// is evicted from memory without waiting for the sweeper.
    pub async fn cancel(
        &self,
        session_id: &str,
        connection_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), SessionError> {
        let entry = self.live(session_id).await.ok_or(SessionError::Inactive)?;
        let mut session = entry.lock().await;
        self.check_participant(&session, connection_id)?;

        let reason = reason.unwrap_or_else(|| "User cancelled".to_string());
        self.store.save_cancellation(session_id, &reason).await?;
        session.status = SessionStatus::Cancelled;
        session.completed_at = Some(now_millis());

        self.rooms.broadcast(
            session_id,
            ServerMessage::StateUpdate {
                update: StateUpdate::SessionCancelled {
                    reason: reason.clone(),
                },
                timestamp: now_millis(),
            },
        );
        drop(session);

        self.evict(session_id).await;
        counter!("pairquiz_sessions_cancelled_total").increment(1);
        info!("Session {} cancelled: {}", session_id, reason);
        Ok(())
    }

    /// Detach a connection after a disconnect or heartbeat timeout. The
    /// survivor of an active session is notified; status is unchanged (the
    /// remaining participant may finish or wait for a reconnect). An empty
    /// session becomes sweep-eligible.
    pub async fn leave(&self, session_id: &str, connection_id: Uuid) {
        let Some(entry) = self.live(session_id).await else {
            return;
        };
        let mut session = entry.lock().await;

        self.rooms.leave(session_id, connection_id);
        let Some(role) = session.detach(connection_id) else {
            return;
        };
        counter!("pairquiz_session_leaves_total", "role" => role.to_string()).increment(1);

        if session.status == SessionStatus::Active && !session.participants.is_empty() {
            self.rooms.broadcast(
                session_id,
                ServerMessage::PartnerDisconnected {
                    message: "Your partner has disconnected".to_string(),
                    session_id: session_id.to_string(),
                    timestamp: now_millis(),
                },
            );
        }

        if session.participants.is_empty() {
            debug!("Session {} has no participants left", session_id);
        }
        info!(
            "Connection {} left session {} ({})",
            connection_id, session_id, role
        );
    }

    /// Cleanup Sweeper pass: evict sessions with no participants that have
    /// been resident longer than the staleness threshold. Durable records
    /// are left untouched; staleness is not a terminal status.
    pub async fn sweep(&self) {
        let mut sessions = self.sessions.write().await;
        let stale: Vec<SessionId> = sessions
            .iter()
            .filter_map(|(id, entry)| {
                // A session whose lock is busy is in use; skip it.
                let session = entry.try_lock().ok()?;
                (session.participants.is_empty()
                    && session.loaded_at.elapsed() >= self.config.stale_after)
                    .then(|| id.clone())
            })
            .collect();

        for id in stale {
            sessions.remove(&id);
            self.rooms.remove(&id);
            counter!("pairquiz_sessions_swept_total").increment(1);
            info!("Evicted stale session: {}", id);
        }
    }

    /// Number of sessions currently resident in memory
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Total sessions ever loaded into memory
    pub fn sessions_loaded(&self) -> u64 {
        self.sessions_loaded.load(Ordering::Relaxed)
    }

    /// Reconnections observed (a vacated role slot repopulated)
    pub fn reconnections(&self) -> u64 {
        self.reconnections.load(Ordering::Relaxed)
    }

    /// Frames dropped on full outbound queues
    pub fn dropped_messages(&self) -> u64 {
        self.rooms.dropped_messages()
    }

    /// Current in-memory state of a session, if resident
    pub async fn snapshot_of(&self, session_id: &str) -> Option<crate::protocol::SessionSnapshot> {
        let entry = self.live(session_id).await?;
        let session = entry.lock().await;
        Some(session.snapshot())
    }

    async fn live(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// Load the durable record and make the session resident. The store
    /// await happens before any lock is taken; a concurrent load of the
    /// same session keeps whichever entry landed first.
    async fn load(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        let record = self.store.load_session(session_id).await.map_err(|e| {
            warn!("Failed to load session {}: {}", session_id, e);
            match e {
                StoreError::NotFound(id) => SessionError::NotFound(id),
                other => SessionError::Store(other),
            }
        })?;

        let session = Session::from_record(record);
        if session.status.is_terminal() {
            return Err(SessionError::Inactive);
        }

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                self.sessions_loaded.fetch_add(1, Ordering::Relaxed);
                counter!("pairquiz_sessions_loaded_total").increment(1);
                Arc::new(Mutex::new(session))
            })
            .clone();
        Ok(entry)
    }

    fn check_participant(
        &self,
        session: &Session,
        connection_id: Uuid,
    ) -> Result<(), SessionError> {
        if session.status.is_terminal() {
            return Err(SessionError::Inactive);
        }
        if !session.is_participant(connection_id) {
            return Err(SessionError::NotParticipant);
        }
        Ok(())
    }

    async fn evict(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        self.rooms.remove(session_id);
    }
}
