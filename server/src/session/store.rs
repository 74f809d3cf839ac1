//! Durable Store Adapter
//!
//! The authoritative session record lives in an external store owned by the
//! platform. This module defines the adapter contract the coordinator
//! consumes, plus an in-memory implementation for single-process
//! deployments and tests.

use crate::protocol::{Role, SessionStatus};
use crate::session::state::now_millis;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

/// Durable store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Authoritative session record.
///
/// `host_user_id`, `partner_user_id`, and `questions` are written by the
/// session-creation collaborator; this subsystem only reads them.
#[derive(Debug, Clone)]
pub struct SessionRecord {
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

impl SessionRecord {
    /// A fresh record as the session-creation collaborator would write it
    pub fn new(
        session_id: impl Into<String>,
        host_user_id: impl Into<String>,
        partner_user_id: Option<&str>,
        questions: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Waiting,
            host_user_id: host_user_id.into(),
            partner_user_id: partner_user_id.map(str::to_string),
            questions,
            current_question_index: 0,
            host_answers: BTreeMap::new(),
            partner_answers: BTreeMap::new(),
            host_score: None,
            partner_score: None,
            host_time_taken: None,
            partner_time_taken: None,
            timer_seconds: 30,
            created_at: now_millis(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Adapter contract consumed by the coordinator. Writes are last-write-wins
/// on the durable record; every state-changing event persists through here
/// so the durable copy never lags memory by more than one operation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the authoritative record
    async fn load_session(&self, session_id: &str) -> Result<SessionRecord, StoreError>;

    /// Persist one side's answer for a question (overwrite semantics)
    async fn save_answer(
        &self,
        session_id: &str,
        side: Role,
        question_index: u32,
        option: &str,
    ) -> Result<(), StoreError>;

    /// Persist the current question index
    async fn save_question_index(&self, session_id: &str, index: u32) -> Result<(), StoreError>;

    /// Persist one side's completion; flips the record to `completed` once
    /// both scores are present
    async fn save_completion(
        &self,
        session_id: &str,
        side: Role,
        score: u32,
        time_taken: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Persist the shared timer value
    async fn save_timer(&self, session_id: &str, seconds: u32) -> Result<(), StoreError>;

    /// Persist an explicit cancellation
    async fn save_cancellation(&self, session_id: &str, reason: &str) -> Result<(), StoreError>;
}

/// In-memory store for single-process deployments and tests
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record; this is the session-creation collaborator's write path
    pub async fn insert(&self, record: SessionRecord) {
        let mut records = self.records.write().await;
        records.insert(record.session_id.clone(), record);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let records = self.records.read().await;
        records.get(session_id).cloned()
    }

    async fn update<F>(&self, session_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let records = self.records.read().await;
        records
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn save_answer(
        &self,
        session_id: &str,
        side: Role,
        question_index: u32,
        option: &str,
    ) -> Result<(), StoreError> {
        self.update(session_id, |record| {
            let answers = match side {
                Role::Host => &mut record.host_answers,
                Role::Partner => &mut record.partner_answers,
            };
            answers.insert(question_index, option.to_string());
        })
        .await
    }

    async fn save_question_index(&self, session_id: &str, index: u32) -> Result<(), StoreError> {
        self.update(session_id, |record| {
            record.current_question_index = index;
        })
        .await
    }

    async fn save_completion(
        &self,
        session_id: &str,
        side: Role,
        score: u32,
        time_taken: Option<u64>,
    ) -> Result<(), StoreError> {
        self.update(session_id, |record| {
            match side {
                Role::Host => {
                    record.host_score = Some(score);
                    record.host_time_taken = time_taken;
                }
                Role::Partner => {
                    record.partner_score = Some(score);
                    record.partner_time_taken = time_taken;
                }
            }
            if record.host_score.is_some() && record.partner_score.is_some() {
                record.status = SessionStatus::Completed;
                record.completed_at = Some(now_millis());
            }
        })
        .await
    }

    async fn save_timer(&self, session_id: &str, seconds: u32) -> Result<(), StoreError> {
        self.update(session_id, |record| {
            record.timer_seconds = seconds;
        })
        .await
    }

    async fn save_cancellation(&self, session_id: &str, _reason: &str) -> Result<(), StoreError> {
        self.update(session_id, |record| {
            record.status = SessionStatus::Cancelled;
            record.completed_at = Some(now_millis());
        })
        .await
    }
}
