//! API Models
//!
//! Request, response and stream payloads, with `utoipa` schemas for the
//! OpenAPI document. Each view is built from the corresponding core type.

use chrono::{DateTime, Utc};
use psychtrainer_core::{
    grading::{CriterionScore, GradeReport},
    orchestrator::StartedSession,
    phase::Phase,
    session::{EvaluationNote, SessionSummary, SimulationSession, Turn},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterviewPhase {
    Introduction,
    Examination,
    Diagnosis,
    Debrief,
}

impl From<Phase> for InterviewPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Introduction => InterviewPhase::Introduction,
            Phase::Examination => InterviewPhase::Examination,
            Phase::Diagnosis => InterviewPhase::Diagnosis,
            Phase::Debrief => InterviewPhase::Debrief,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionListItem {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub title: String,
    pub ended: bool,
    pub phase: InterviewPhase,
    pub turn_count: u32,
    pub last_active: DateTime<Utc>,
}

impl From<SessionSummary> for SessionListItem {
    fn from(summary: SessionSummary) -> Self {
        Self {
            id: summary.id,
            title: summary.title,
            ended: summary.ended,
            phase: summary.phase.into(),
            turn_count: summary.turn_count,
            last_active: summary.last_active,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct CreatedSession {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub title: String,
    pub phase: InterviewPhase,
    pub turn_count: u32,
    #[schema(example = "You are about to interview James...")]
    pub opening_message: String,
    pub created_at: DateTime<Utc>,
}

impl From<StartedSession> for CreatedSession {
    fn from(started: StartedSession) -> Self {
        Self {
            id: started.session.id,
            title: started.session.title,
            phase: started.session.phase.into(),
            turn_count: started.session.turn_count,
            opening_message: started.opening_message.to_string(),
            created_at: started.session.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TurnView {
    pub index: u32,
    pub student: String,
    pub persona: String,
    pub created_at: DateTime<Utc>,
}

impl From<Turn> for TurnView {
    fn from(turn: Turn) -> Self {
        Self {
            index: turn.index,
            student: turn.student,
            persona: turn.persona,
            created_at: turn.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct NoteView {
    pub turn: u32,
    pub note: String,
    #[schema(example = "positive")]
    pub polarity: Option<String>,
}

impl From<EvaluationNote> for NoteView {
    fn from(note: EvaluationNote) -> Self {
        Self {
            turn: note.turn,
            note: note.text,
            polarity: note.polarity.map(|p| p.as_str().to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CriterionView {
    #[schema(example = "Risk Assessment")]
    pub criterion: String,
    #[schema(minimum = 0, maximum = 10)]
    pub score: u8,
    pub feedback: String,
}

impl From<CriterionScore> for CriterionView {
    fn from(score: CriterionScore) -> Self {
        Self {
            criterion: score.criterion,
            score: score.score,
            feedback: score.feedback,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct GradeReportView {
    #[schema(minimum = 0, maximum = 100)]
    pub overall_score: u32,
    #[schema(example = "B")]
    pub letter_grade: String,
    pub criteria: Vec<CriterionView>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
}

impl From<GradeReport> for GradeReportView {
    fn from(report: GradeReport) -> Self {
        Self {
            overall_score: report.overall_score,
            letter_grade: report.letter_grade.as_str().to_string(),
            criteria: report.criteria.into_iter().map(Into::into).collect(),
            strengths: report.strengths,
            improvements: report.improvements,
            summary: report.summary,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionDetail {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub title: String,
    pub ended: bool,
    pub phase: InterviewPhase,
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub turns: Vec<TurnView>,
    pub notes: Vec<NoteView>,
    pub report: Option<GradeReportView>,
}

impl From<SimulationSession> for SessionDetail {
    fn from(session: SimulationSession) -> Self {
        Self {
            id: session.id,
            title: session.title,
            ended: session.ended,
            phase: session.phase.into(),
            turn_count: session.turn_count,
            created_at: session.created_at,
            last_active: session.last_active,
            turns: session.turns.into_iter().map(Into::into).collect(),
            notes: session.notes.into_iter().map(Into::into).collect(),
            report: session.report.map(Into::into),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitTurnPayload {
    #[schema(example = "Can you tell me about your hand-washing? How many times a day?")]
    pub message: String,
}

/// Payload of an unnamed stream event: one fragment of the persona's reply.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TokenEvent {
    pub token: String,
}

/// Payload of the `done` stream event.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct DoneEvent {
    pub phase: InterviewPhase,
    pub turn_count: u32,
    pub professor_note: Option<String>,
}

/// Payload of the `error` stream event.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub error: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
