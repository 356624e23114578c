//! Session data model.
//!
//! A `SimulationSession` exclusively owns its turns, its evaluation notes and
//! at most one grade report. Turns and notes are append-only.

use crate::{grading::GradeReport, phase::Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to a session until the first exchange is summarised into one.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// One student-message / persona-reply exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based position of the turn within its session.
    pub index: u32,
    pub student: String,
    pub persona: String,
    pub created_at: DateTime<Utc>,
}

/// Coarse tone of an evaluation note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Neutral,
    Negative,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Neutral => "neutral",
            Polarity::Negative => "negative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(Polarity::Positive),
            "neutral" => Some(Polarity::Neutral),
            "negative" => Some(Polarity::Negative),
            _ => None,
        }
    }
}

/// A silent observation recorded by the grader for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationNote {
    /// Index of the turn this note was written for.
    pub turn: u32,
    pub text: String,
    pub polarity: Option<Polarity>,
    pub created_at: DateTime<Utc>,
}

impl EvaluationNote {
    /// Builds a note from raw grader output.
    ///
    /// A leading `[+]`, `[~]` or `[-]` marker sets the polarity and is kept in
    /// the text. Blank output yields no note.
    pub fn from_grader_output(turn: u32, raw: &str) -> Option<Self> {
        let text = raw.trim().trim_matches('"').trim();
        if text.is_empty() {
            return None;
        }
        let polarity = if text.starts_with("[+]") {
            Some(Polarity::Positive)
        } else if text.starts_with("[~]") {
            Some(Polarity::Neutral)
        } else if text.starts_with("[-]") {
            Some(Polarity::Negative)
        } else {
            None
        };
        Some(Self {
            turn,
            text: text.to_string(),
            polarity,
            created_at: Utc::now(),
        })
    }
}

/// The complete state of one simulated interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSession {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub ended: bool,
    pub phase: Phase,
    pub turn_count: u32,
    /// Rolling summary of the turns that no longer fit the prompt window.
    pub summary: Option<String>,
    /// How many leading turns `summary` covers.
    pub summarized_turns: u32,
    pub turns: Vec<Turn>,
    pub notes: Vec<EvaluationNote>,
    pub report: Option<GradeReport>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl SimulationSession {
    /// Creates a fresh session at `introduction` with no turns.
    pub fn new(id: Uuid, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            title: DEFAULT_TITLE.to_string(),
            ended: false,
            phase: Phase::Introduction,
            turn_count: 0,
            summary: None,
            summarized_turns: 0,
            turns: Vec::new(),
            notes: Vec::new(),
            report: None,
            created_at: now,
            last_active: now,
        }
    }

    /// Turns not yet folded into `summary`.
    pub fn recent_turns(&self) -> &[Turn] {
        let start = (self.summarized_turns as usize).min(self.turns.len());
        &self.turns[start..]
    }
}

/// The lightweight view used when listing a user's sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub ended: bool,
    pub phase: Phase,
    pub turn_count: u32,
    pub last_active: DateTime<Utc>,
}

impl From<&SimulationSession> for SessionSummary {
    fn from(session: &SimulationSession) -> Self {
        Self {
            id: session.id,
            title: session.title.clone(),
            ended: session.ended,
            phase: session.phase,
            turn_count: session.turn_count,
            last_active: session.last_active,
        }
    }
}

/// Renders turns as a plain `STUDENT:` / `PATIENT:` transcript.
pub fn transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str("STUDENT: ");
        out.push_str(&turn.student);
        out.push_str("\nPATIENT: ");
        out.push_str(&turn.persona);
        out.push('\n');
    }
    out
}
