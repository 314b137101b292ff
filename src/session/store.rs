//! Durable session storage contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::sync::lock;

pub type SessionId = u64;
pub type LineId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Operating,
    Finished,
    Cancelled,
}

/// Single-step change of a session total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Delta {
    Increment,
    Decrement,
}

impl Delta {
    pub fn value(self) -> i8 {
        match self {
            Delta::Increment => 1,
            Delta::Decrement => -1,
        }
    }

    /// Total after applying this delta to `total`, `None` below zero.
    pub fn apply(self, total: u64) -> Option<u64> {
        match self {
            Delta::Increment => total.checked_add(1),
            Delta::Decrement => total.checked_sub(1),
        }
    }
}

impl From<Delta> for i8 {
    fn from(delta: Delta) -> Self {
        delta.value()
    }
}

impl TryFrom<i8> for Delta {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Delta::Increment),
            -1 => Ok(Delta::Decrement),
            other => Err(format!("delta must be +1 or -1, got {other}")),
        }
    }
}

/// One counting session of a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub line_id: LineId,
    pub lot: String,
    pub target_count: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_total: Option<u64>,
    pub status: SessionStatus,
    pub note: Option<String>,
}

/// Append-only record of one change of a session total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub session_id: SessionId,
    pub line_id: LineId,
    pub timestamp: DateTime<Utc>,
    pub delta: Delta,
    pub running_total: u64,
}

/// Durable storage for sessions and their delta logs.
///
/// Calls arrive from command threads (`create_session`, `finish_session`,
/// `operating_session`) and from capture workers (`append_log`), so
/// implementations synchronise internally.
pub trait SessionStore: Send + Sync {
    /// The session currently Operating on `line_id`, if any.
    fn operating_session(&self, line_id: LineId) -> Result<Option<SessionId>, StoreError>;

    /// Open a session. Returns the existing id if the line already has an
    /// Operating session.
    fn create_session(&self, line_id: LineId, lot: &str, target_count: Option<u32>) -> Result<SessionId, StoreError>;

    fn append_log(
        &self,
        session_id: SessionId,
        line_id: LineId,
        delta: Delta,
        running_total: u64,
    ) -> Result<(), StoreError>;

    fn finish_session(
        &self,
        session_id: SessionId,
        final_total: u64,
        status: SessionStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: SessionId,
    sessions: BTreeMap<SessionId, Session>,
    logs: BTreeMap<SessionId, Vec<LogEntry>>,
}

/// [`SessionStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, session_id: SessionId) -> Option<Session> {
        lock(&self.inner).sessions.get(&session_id).cloned()
    }

    /// All sessions in creation order.
    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.inner).sessions.values().cloned().collect()
    }

    pub fn log_entries(&self, session_id: SessionId) -> Vec<LogEntry> {
        lock(&self.inner).logs.get(&session_id).cloned().unwrap_or_default()
    }
}

impl SessionStore for MemorySessionStore {
    fn operating_session(&self, line_id: LineId) -> Result<Option<SessionId>, StoreError> {
        let inner = lock(&self.inner);
        Ok(inner
            .sessions
            .values()
            .find(|s| s.line_id == line_id && s.status == SessionStatus::Operating)
            .map(|s| s.id))
    }

    fn create_session(&self, line_id: LineId, lot: &str, target_count: Option<u32>) -> Result<SessionId, StoreError> {
        let mut inner = lock(&self.inner);
        if let Some(open) = inner
            .sessions
            .values()
            .find(|s| s.line_id == line_id && s.status == SessionStatus::Operating)
        {
            return Ok(open.id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.sessions.insert(
            id,
            Session {
                id,
                line_id,
                lot: lot.to_string(),
                target_count,
                started_at: Utc::now(),
                ended_at: None,
                final_total: None,
                status: SessionStatus::Operating,
                note: None,
            },
        );
        inner.logs.insert(id, Vec::new());
        Ok(id)
    }

    fn append_log(
        &self,
        session_id: SessionId,
        line_id: LineId,
        delta: Delta,
        running_total: u64,
    ) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        match inner.sessions.get(&session_id) {
            None => return Err(StoreError::NotFound(session_id)),
            Some(s) if s.status != SessionStatus::Operating => return Err(StoreError::Closed(session_id)),
            Some(_) => {}
        }
        inner.logs.entry(session_id).or_default().push(LogEntry {
            session_id,
            line_id,
            timestamp: Utc::now(),
            delta,
            running_total,
        });
        Ok(())
    }

    fn finish_session(
        &self,
        session_id: SessionId,
        final_total: u64,
        status: SessionStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound(session_id))?;
        if session.status != SessionStatus::Operating {
            return Err(StoreError::Closed(session_id));
        }
        session.status = status;
        session.final_total = Some(final_total);
        session.ended_at = Some(Utc::now());
        session.note = note.map(str::to_owned);
        Ok(())
    }
}
