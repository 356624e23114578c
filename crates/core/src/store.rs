//! Session Store contract.
//!
//! Persistence is an external collaborator. The orchestrator only needs a
//! handful of operations, each of which must be atomic: a turn commit appends
//! the turn, its note and the new session fields together or not at all, and
//! finalisation stores the report and marks the session ended together.

use crate::{
    grading::GradeReport,
    phase::Phase,
    session::{EvaluationNote, SessionSummary, SimulationSession, Turn},
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A new rolling summary covering the first `summarized_turns` turns.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryUpdate {
    pub text: String,
    pub summarized_turns: u32,
}

/// Everything written when a turn completes.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnCommit {
    pub turn: Turn,
    pub note: Option<EvaluationNote>,
    pub phase: Phase,
    /// The session's `turn_count` the commit was computed against. A store
    /// must refuse the commit if the stored value differs.
    pub expected_turn_count: u32,
    pub summary: Option<SummaryUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Finalized,
    /// The session was already ended; nothing was written.
    AlreadyEnded,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &SimulationSession) -> Result<()>;

    /// Loads a session with its turns, notes and report.
    async fn load_session(&self, id: Uuid) -> Result<Option<SimulationSession>>;

    /// A user's sessions, most recently active first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>>;

    /// Atomically appends a turn (and its note) and updates the session.
    async fn commit_turn(&self, id: Uuid, commit: &TurnCommit) -> Result<()>;

    /// Atomically stores the report and marks the session ended.
    async fn finalize_session(&self, id: Uuid, report: &GradeReport) -> Result<FinalizeOutcome>;

    async fn update_title(&self, id: Uuid, title: &str) -> Result<()>;
}

/// A process-local store for tests and offline runs.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SimulationSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: &SimulationSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            bail!("Session '{}' already exists", session.id);
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<SimulationSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(SessionSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(summaries)
    }

    async fn commit_turn(&self, id: Uuid, commit: &TurnCommit) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            bail!("Session '{id}' not found");
        };
        if session.ended {
            bail!("Session '{id}' has already ended");
        }
        if session.turn_count != commit.expected_turn_count {
            bail!(
                "Session '{id}' moved on: expected turn count {}, found {}",
                commit.expected_turn_count,
                session.turn_count
            );
        }

        session.turns.push(commit.turn.clone());
        if let Some(note) = &commit.note {
            session.notes.push(note.clone());
        }
        if let Some(summary) = &commit.summary {
            session.summary = Some(summary.text.clone());
            session.summarized_turns = summary.summarized_turns;
        }
        session.turn_count = commit.turn.index;
        session.phase = commit.phase.max(session.phase);
        session.last_active = Utc::now();
        Ok(())
    }

    async fn finalize_session(&self, id: Uuid, report: &GradeReport) -> Result<FinalizeOutcome> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            bail!("Session '{id}' not found");
        };
        if session.ended {
            return Ok(FinalizeOutcome::AlreadyEnded);
        }
        session.ended = true;
        session.report = Some(report.clone());
        session.last_active = Utc::now();
        Ok(FinalizeOutcome::Finalized)
    }

    async fn update_title(&self, id: Uuid, title: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            bail!("Session '{id}' not found");
        };
        session.title = title.to_string();
        Ok(())
    }
}
