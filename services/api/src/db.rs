//! Data Access Layer
//!
//! Postgres implementations of the core `SessionStore` and `PromptRegistry`
//! contracts. Queries go through `sqlx` with a shared connection pool; every
//! multi-row write runs inside a single transaction.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use psychtrainer_core::{
    grading::GradeReport,
    prompts::{PromptRegistry, PromptRole, VersionedPrompt},
    session::{EvaluationNote, Polarity, SessionSummary, SimulationSession, Turn},
    store::{FinalizeOutcome, SessionStore, TurnCommit},
};
use sqlx::{FromRow, PgPool, types::Json};
use uuid::Uuid;

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: String,
    title: String,
    is_ended: bool,
    phase: String,
    turn_count: i32,
    summary: Option<String>,
    summarized_turns: i32,
    grade_report: Option<Json<GradeReport>>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TurnRow {
    turn_index: i32,
    student_message: String,
    persona_reply: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct NoteRow {
    turn_index: i32,
    note: String,
    polarity: Option<String>,
    created_at: DateTime<Utc>,
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("negative value {value} in column '{column}'"))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).context("counter does not fit in an INTEGER column")
}

impl SessionRow {
    fn into_summary(self) -> Result<SessionSummary> {
        Ok(SessionSummary {
            id: self.id,
            title: self.title,
            ended: self.is_ended,
            phase: self.phase.parse()?,
            turn_count: to_u32(self.turn_count, "turn_count")?,
            last_active: self.last_active,
        })
    }

    fn into_session(self, turns: Vec<TurnRow>, notes: Vec<NoteRow>) -> Result<SimulationSession> {
        let turns = turns
            .into_iter()
            .map(|row| {
                Ok(Turn {
                    index: to_u32(row.turn_index, "turn_index")?,
                    student: row.student_message,
                    persona: row.persona_reply,
                    created_at: row.created_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let notes = notes
            .into_iter()
            .map(|row| {
                Ok(EvaluationNote {
                    turn: to_u32(row.turn_index, "turn_index")?,
                    text: row.note,
                    polarity: row.polarity.as_deref().and_then(Polarity::parse),
                    created_at: row.created_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SimulationSession {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            ended: self.is_ended,
            phase: self.phase.parse()?,
            turn_count: to_u32(self.turn_count, "turn_count")?,
            summary: self.summary,
            summarized_turns: to_u32(self.summarized_turns, "summarized_turns")?,
            turns,
            notes,
            report: self.grade_report.map(|Json(report)| report),
            created_at: self.created_at,
            last_active: self.last_active,
        })
    }
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Db {
    async fn create_session(&self, session: &SimulationSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, title, phase, turn_count, created_at, last_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(session.phase.as_str())
        .bind(to_i32(session.turn_count)?)
        .bind(session.created_at)
        .bind(session.last_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<SimulationSession>> {
        // One read transaction so the turns and notes match the session row.
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, title, is_ended, phase, turn_count, summary,
                   summarized_turns, grade_report, created_at, last_active
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let turns = sqlx::query_as::<_, TurnRow>(
            r#"
            SELECT turn_index, student_message, persona_reply, created_at
            FROM turns
            WHERE session_id = $1
            ORDER BY turn_index ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let notes = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT turn_index, note, polarity, created_at
            FROM evaluation_notes
            WHERE session_id = $1
            ORDER BY turn_index ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_session(turns, notes).map(Some)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, title, is_ended, phase, turn_count, summary,
                   summarized_turns, NULL::jsonb AS grade_report, created_at, last_active
            FROM sessions
            WHERE user_id = $1
            ORDER BY last_active DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRow::into_summary).collect()
    }

    async fn commit_turn(&self, id: Uuid, commit: &TurnCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // The guard on turn_count and is_ended makes a stale or late commit a no-op;
        // dropping `tx` on the early return rolls back.
        let updated = sqlx::query(
            r#"
            UPDATE sessions
            SET turn_count = $2,
                phase = $3,
                summary = COALESCE($4, summary),
                summarized_turns = COALESCE($5, summarized_turns),
                last_active = NOW()
            WHERE id = $1 AND turn_count = $6 AND NOT is_ended
            "#,
        )
        .bind(id)
        .bind(to_i32(commit.turn.index)?)
        .bind(commit.phase.as_str())
        .bind(commit.summary.as_ref().map(|s| s.text.as_str()))
        .bind(commit.summary.as_ref().map(|s| to_i32(s.summarized_turns)).transpose()?)
        .bind(to_i32(commit.expected_turn_count)?)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            bail!(
                "session {id} changed underneath the turn (expected turn count {})",
                commit.expected_turn_count
            );
        }

        sqlx::query(
            r#"
            INSERT INTO turns (session_id, turn_index, student_message, persona_reply, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(to_i32(commit.turn.index)?)
        .bind(&commit.turn.student)
        .bind(&commit.turn.persona)
        .bind(commit.turn.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(note) = &commit.note {
            sqlx::query(
                r#"
                INSERT INTO evaluation_notes (session_id, turn_index, note, polarity, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(to_i32(note.turn)?)
            .bind(&note.text)
            .bind(note.polarity.map(|p| p.as_str()))
            .bind(note.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_session(&self, id: Uuid, report: &GradeReport) -> Result<FinalizeOutcome> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE sessions
            SET is_ended = TRUE, grade_report = $2, last_active = NOW()
            WHERE id = $1 AND NOT is_ended
            "#,
        )
        .bind(id)
        .bind(Json(report))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>("SELECT is_ended FROM sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            return match exists {
                Some(_) => Ok(FinalizeOutcome::AlreadyEnded),
                None => Err(anyhow!("session {id} does not exist")),
            };
        }

        tx.commit().await?;
        Ok(FinalizeOutcome::Finalized)
    }

    async fn update_title(&self, id: Uuid, title: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET title = $2 WHERE id = $1")
            .bind(id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PromptRegistry for Db {
    async fn lookup(&self, role: PromptRole) -> Result<Option<VersionedPrompt>> {
        let row = sqlx::query_as::<_, (i32, String)>(
            r#"
            SELECT version, content
            FROM system_prompts
            WHERE role = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(role.key())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(version, content)| VersionedPrompt {
            role,
            version: version.into(),
            content,
        }))
    }
}
