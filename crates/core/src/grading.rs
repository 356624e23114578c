//! Grade Aggregator
//!
//! Folds a finished session into one `GradeReport`. The numeric scores come
//! from a `RubricScorer`: normally the generation backend, with a
//! deterministic note-tally scorer standing in whenever the backend fails, so
//! finalisation itself never fails on the backend. Everything after scoring
//! (risk ceiling, overall score, letter, strengths, improvements) is pure
//! arithmetic.

use crate::{
    grader::RubricDimension,
    llm_client::{ChatMessage, CompletionPurpose, CompletionRequest, LLMClient},
    prompts::{PromptRegistry, PromptRole, render, resolve_prompt},
    risk::is_risk_question,
    session::{Polarity, SimulationSession, transcript},
};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{info, warn};

/// Highest score a single dimension can receive.
pub const MAX_DIMENSION_SCORE: u8 = 10;

/// Default cap on the risk-assessment score when risk was never explored.
pub const DEFAULT_RISK_CEILING: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    /// Fixed thresholds: A ≥ 90, B ≥ 80, C ≥ 70, D ≥ 60, otherwise F.
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => LetterGrade::A,
            80..=89 => LetterGrade::B,
            70..=79 => LetterGrade::C,
            60..=69 => LetterGrade::D,
            _ => LetterGrade::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `round(sum / 70 * 100)` in integer arithmetic. With seven 0-10 scores the
/// exact quotient never lands on a half, so rounding direction is moot.
pub fn overall_score(scores: &[u8]) -> u32 {
    let max = (scores.len() as u32) * u32::from(MAX_DIMENSION_SCORE);
    if max == 0 {
        return 0;
    }
    let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    (sum * 100 + max / 2) / max
}

/// One scored rubric criterion in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub score: u8,
    pub feedback: String,
}

/// The immutable end-of-session grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub overall_score: u32,
    pub letter_grade: LetterGrade,
    pub criteria: Vec<CriterionScore>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
}

/// A scorer's verdict on one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionScore {
    pub dimension: RubricDimension,
    pub score: u8,
    pub feedback: String,
}

/// A complete scoring pass: exactly one entry per dimension, in rubric order.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricAssessment {
    pub summary: String,
    pub scores: Vec<DimensionScore>,
}

impl RubricAssessment {
    /// Exactly one entry for each of the seven dimensions.
    pub fn covers_rubric(&self) -> bool {
        self.scores.len() == RubricDimension::ALL.len()
            && RubricDimension::ALL
                .iter()
                .all(|dim| self.scores.iter().filter(|s| s.dimension == *dim).count() == 1)
    }

    /// Puts the entries in rubric order and clamps every score to 0-10.
    fn normalize(&mut self) {
        self.scores.sort_by_key(|s| s.dimension);
        for entry in &mut self.scores {
            entry.score = entry.score.min(MAX_DIMENSION_SCORE);
        }
    }

    fn score_mut(&mut self, dimension: RubricDimension) -> Option<&mut DimensionScore> {
        self.scores.iter_mut().find(|s| s.dimension == dimension)
    }
}

/// Produces the seven rubric scores for a finished session.
#[async_trait]
pub trait RubricScorer: Send + Sync {
    async fn score(&self, session: &SimulationSession) -> Result<RubricAssessment>;
}

#[derive(Deserialize)]
struct RawAssessment {
    #[serde(default)]
    summary: String,
    criteria: Vec<RawCriterion>,
}

#[derive(Deserialize)]
struct RawCriterion {
    criterion: String,
    score: f64,
    #[serde(default)]
    feedback: String,
}

/// Parses the backend's JSON verdict. Every dimension must be present;
/// scores are rounded and clamped to 0-10.
pub fn parse_assessment(raw: &str) -> Result<RubricAssessment> {
    let start = raw.find('{').context("No JSON object in scorer output")?;
    let end = raw.rfind('}').context("Unterminated JSON object in scorer output")?;
    if end < start {
        bail!("Malformed JSON object in scorer output");
    }
    let parsed: RawAssessment =
        serde_json::from_str(&raw[start..=end]).context("Scorer output is not a valid assessment")?;

    let mut scores = Vec::with_capacity(RubricDimension::ALL.len());
    for dimension in RubricDimension::ALL {
        let entry = parsed
            .criteria
            .iter()
            .find(|c| RubricDimension::from_name(&c.criterion) == Some(dimension))
            .with_context(|| format!("Scorer omitted '{dimension}'"))?;
        if !entry.score.is_finite() {
            bail!("Non-numeric score for '{dimension}'");
        }
        scores.push(DimensionScore {
            dimension,
            score: entry.score.round().clamp(0.0, f64::from(MAX_DIMENSION_SCORE)) as u8,
            feedback: entry.feedback.trim().to_string(),
        });
    }
    Ok(RubricAssessment {
        summary: parsed.summary.trim().to_string(),
        scores,
    })
}

/// Scores through the generation backend with the `final_grader` prompt.
pub struct LlmRubricScorer {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<dyn PromptRegistry>,
}

impl LlmRubricScorer {
    pub fn new(llm: Arc<dyn LLMClient>, prompts: Arc<dyn PromptRegistry>) -> Self {
        Self { llm, prompts }
    }
}

#[async_trait]
impl RubricScorer for LlmRubricScorer {
    async fn score(&self, session: &SimulationSession) -> Result<RubricAssessment> {
        let notes = if session.notes.is_empty() {
            "No observation notes were recorded.".to_string()
        } else {
            session
                .notes
                .iter()
                .map(|n| format!("Turn {}: {}", n.turn, n.text))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let template = resolve_prompt(self.prompts.as_ref(), PromptRole::FinalGrader).await;
        let prompt = render(
            &template,
            &[
                ("professor_notes", &notes),
                ("transcript", &transcript(&session.turns)),
            ],
        );
        let request = CompletionRequest::new(CompletionPurpose::FinalGrade, vec![ChatMessage::user(prompt)])
            .temperature(0.2)
            .json();
        let raw = self.llm.complete(request).await?;
        parse_assessment(&raw)
    }
}

/// Deterministic scorer built from the polarity of the grader's notes.
///
/// Each dimension starts at 5 and moves one point per positive or negative
/// note that mentions it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteTallyScorer;

impl NoteTallyScorer {
    const BASELINE: i32 = 5;

    pub fn assess(&self, session: &SimulationSession) -> RubricAssessment {
        let scores = RubricDimension::ALL
            .into_iter()
            .map(|dimension| {
                let mut score = Self::BASELINE;
                let mut mentions = 0;
                for note in &session.notes {
                    let text = note.text.to_lowercase();
                    if !dimension.cues().iter().any(|cue| text.contains(cue)) {
                        continue;
                    }
                    mentions += 1;
                    match note.polarity {
                        Some(Polarity::Positive) => score += 1,
                        Some(Polarity::Negative) => score -= 1,
                        Some(Polarity::Neutral) | None => {}
                    }
                }
                let feedback = match mentions {
                    0 => "No specific observations were recorded.".to_string(),
                    1 => "Based on 1 observation.".to_string(),
                    n => format!("Based on {n} observations."),
                };
                DimensionScore {
                    dimension,
                    score: score.clamp(0, i32::from(MAX_DIMENSION_SCORE)) as u8,
                    feedback,
                }
            })
            .collect();

        let count = |p: Polarity| session.notes.iter().filter(|n| n.polarity == Some(p)).count();
        RubricAssessment {
            summary: format!(
                "Interview of {} turns with {} observation notes ({} positive, {} negative).",
                session.turns.len(),
                session.notes.len(),
                count(Polarity::Positive),
                count(Polarity::Negative),
            ),
            scores,
        }
    }
}

#[async_trait]
impl RubricScorer for NoteTallyScorer {
    async fn score(&self, session: &SimulationSession) -> Result<RubricAssessment> {
        Ok(self.assess(session))
    }
}

/// True when any student message asked about suicidal ideation or self-harm.
pub fn risk_explored(session: &SimulationSession) -> bool {
    session.turns.iter().any(|turn| is_risk_question(&turn.student))
}

/// Builds the report from a complete assessment.
///
/// Strengths are up to three of the highest-scoring dimensions above
/// `ceiling`. Improvements are every dimension at or below `ceiling`, topped
/// up with the lowest remaining dimensions to at least two entries, and never
/// overlap the strengths.
pub fn build_report(mut assessment: RubricAssessment, ceiling: u8) -> GradeReport {
    assessment.normalize();
    let scores: Vec<u8> = assessment.scores.iter().map(|s| s.score).collect();
    let overall = overall_score(&scores);

    let mut ranked: Vec<&DimensionScore> = assessment.scores.iter().collect();
    // Stable sort keeps rubric order among equal scores.
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    let strengths: Vec<&DimensionScore> = ranked
        .iter()
        .copied()
        .filter(|s| s.score > ceiling)
        .take(3)
        .collect();

    let mut weakest = ranked.clone();
    weakest.reverse();
    let mut improvements: Vec<&DimensionScore> = weakest.iter().copied().filter(|s| s.score <= ceiling).collect();
    for candidate in weakest {
        if improvements.len() >= 2 {
            break;
        }
        let taken = improvements.iter().any(|s| s.dimension == candidate.dimension)
            || strengths.iter().any(|s| s.dimension == candidate.dimension);
        if !taken {
            improvements.push(candidate);
        }
    }

    let line = |s: &DimensionScore| {
        if s.feedback.is_empty() {
            format!("{} ({}/10)", s.dimension, s.score)
        } else {
            format!("{} ({}/10): {}", s.dimension, s.score, s.feedback)
        }
    };

    GradeReport {
        overall_score: overall,
        letter_grade: LetterGrade::from_score(overall),
        strengths: strengths.iter().map(|s| line(s)).collect(),
        improvements: improvements.iter().map(|s| line(s)).collect(),
        criteria: assessment
            .scores
            .iter()
            .map(|s| CriterionScore {
                criterion: s.dimension.display_name().to_string(),
                score: s.score,
                feedback: s.feedback.clone(),
            })
            .collect(),
        summary: assessment.summary,
    }
}

/// Produces the final report for a session.
pub struct GradeAggregator {
    scorer: Arc<dyn RubricScorer>,
    fallback: NoteTallyScorer,
    risk_ceiling: u8,
    timeout: Duration,
}

impl GradeAggregator {
    pub fn new(scorer: Arc<dyn RubricScorer>, risk_ceiling: u8, timeout: Duration) -> Self {
        Self {
            scorer,
            fallback: NoteTallyScorer,
            risk_ceiling: risk_ceiling.min(MAX_DIMENSION_SCORE),
            timeout,
        }
    }

    pub fn risk_ceiling(&self) -> u8 {
        self.risk_ceiling
    }

    /// Scores the session and assembles its report. Has no side effects, so
    /// it is safe to retry until the report is persisted.
    pub async fn finalize(&self, session: &SimulationSession) -> GradeReport {
        let mut assessment = match tokio::time::timeout(self.timeout, self.scorer.score(session)).await {
            Ok(Ok(assessment)) if assessment.covers_rubric() => assessment,
            Ok(Ok(assessment)) => {
                warn!(
                    session_id = %session.id,
                    entries = assessment.scores.len(),
                    "Rubric scorer did not cover every dimension; using note tally"
                );
                self.fallback.assess(session)
            }
            Ok(Err(e)) => {
                warn!(session_id = %session.id, error = ?e, "Rubric scoring failed; using note tally");
                self.fallback.assess(session)
            }
            Err(_) => {
                warn!(session_id = %session.id, "Rubric scoring timed out; using note tally");
                self.fallback.assess(session)
            }
        };

        if !risk_explored(session) {
            if let Some(risk) = assessment.score_mut(RubricDimension::RiskAssessment) {
                if risk.score > self.risk_ceiling {
                    info!(session_id = %session.id, from = risk.score, to = self.risk_ceiling, "Capping unexplored risk assessment");
                    risk.score = self.risk_ceiling;
                }
                risk.feedback = "Suicidal ideation and self-harm were never asked about; ask directly and \
                                 sensitively about thoughts of ending life, self-harm and substance use."
                    .to_string();
            }
        }

        build_report(assessment, self.risk_ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm_client::MockLLMClient,
        prompts::StaticPromptRegistry,
        session::{EvaluationNote, Turn},
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn assessment(scores: [u8; 7]) -> RubricAssessment {
        RubricAssessment {
            summary: "Summary.".into(),
            scores: RubricDimension::ALL
                .into_iter()
                .zip(scores)
                .map(|(dimension, score)| DimensionScore {
                    dimension,
                    score,
                    feedback: String::new(),
                })
                .collect(),
        }
    }

    fn session_with(messages: &[&str], notes: &[&str]) -> SimulationSession {
        let mut session = SimulationSession::new(Uuid::new_v4(), "user-1");
        session.turns = messages
            .iter()
            .enumerate()
            .map(|(i, m)| Turn {
                index: i as u32 + 1,
                student: m.to_string(),
                persona: "Okay.".into(),
                created_at: Utc::now(),
            })
            .collect();
        session.notes = notes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| EvaluationNote::from_grader_output(i as u32 + 1, n))
            .collect();
        session
    }

    struct FixedScorer(RubricAssessment);

    #[async_trait]
    impl RubricScorer for FixedScorer {
        async fn score(&self, _session: &SimulationSession) -> Result<RubricAssessment> {
            Ok(self.0.clone())
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl RubricScorer for FailingScorer {
        async fn score(&self, _session: &SimulationSession) -> Result<RubricAssessment> {
            bail!("backend unavailable")
        }
    }

    #[test]
    fn test_overall_score_rounds_to_nearest() {
        assert_eq!(overall_score(&[10; 7]), 100);
        assert_eq!(overall_score(&[0; 7]), 0);
        // 44/70 = 62.86
        assert_eq!(overall_score(&[7, 6, 6, 5, 5, 7, 8]), 63);
        // 1/70 = 1.43
        assert_eq!(overall_score(&[1, 0, 0, 0, 0, 0, 0]), 1);
        // 3/70 = 4.29, 4/70 = 5.71
        assert_eq!(overall_score(&[3, 0, 0, 0, 0, 0, 0]), 4);
        assert_eq!(overall_score(&[4, 0, 0, 0, 0, 0, 0]), 6);
        assert_eq!(overall_score(&[]), 0);
    }

    #[test]
    fn test_letter_boundaries() {
        assert_eq!(LetterGrade::from_score(100), LetterGrade::A);
        assert_eq!(LetterGrade::from_score(90), LetterGrade::A);
        assert_eq!(LetterGrade::from_score(89), LetterGrade::B);
        assert_eq!(LetterGrade::from_score(80), LetterGrade::B);
        assert_eq!(LetterGrade::from_score(79), LetterGrade::C);
        assert_eq!(LetterGrade::from_score(70), LetterGrade::C);
        assert_eq!(LetterGrade::from_score(69), LetterGrade::D);
        assert_eq!(LetterGrade::from_score(60), LetterGrade::D);
        assert_eq!(LetterGrade::from_score(59), LetterGrade::F);
        assert_eq!(LetterGrade::from_score(0), LetterGrade::F);
    }

    #[test]
    fn test_parse_assessment_accepts_fenced_json() {
        let raw = r#"```json
{"summary": "Solid.", "criteria": [
  {"criterion": "Rapport Building", "score": 8, "feedback": "Warm."},
  {"criterion": "History Taking", "score": 7.4, "feedback": "Good."},
  {"criterion": "Risk Assessment", "score": 12, "feedback": "Thorough."},
  {"criterion": "Mental State Examination", "score": 5},
  {"criterion": "Clinical Reasoning", "score": 6, "feedback": ""},
  {"criterion": "Communication", "score": -1, "feedback": "Jargon."},
  {"criterion": "Professionalism", "score": 9, "feedback": "Respectful."}
]}
```"#;
        let parsed = parse_assessment(raw).unwrap();
        let scores: Vec<u8> = parsed.scores.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![8, 7, 10, 5, 6, 0, 9]);
        assert_eq!(parsed.summary, "Solid.");
        assert_eq!(parsed.scores[5].dimension, RubricDimension::Communication);
    }

    #[test]
    fn test_parse_assessment_rejects_incomplete_output() {
        assert!(parse_assessment("I cannot grade this.").is_err());
        assert!(parse_assessment(r#"{"criteria": [{"criterion": "Rapport Building", "score": 8}]}"#).is_err());
    }

    #[test]
    fn test_build_report_strengths_and_improvements() {
        let report = build_report(assessment([8, 7, 2, 5, 4, 9, 6]), 3);
        assert_eq!(report.overall_score, 59);
        assert_eq!(report.letter_grade, LetterGrade::F);
        assert_eq!(report.criteria.len(), 7);
        assert_eq!(
            report.strengths,
            vec![
                "Communication Skills (9/10)",
                "Rapport Building (8/10)",
                "History Taking (7/10)"
            ]
        );
        assert_eq!(
            report.improvements,
            vec!["Risk Assessment (2/10)", "Clinical Reasoning (4/10)"]
        );
    }

    #[test]
    fn test_build_report_lists_every_dimension_under_ceiling() {
        let report = build_report(assessment([1, 2, 3, 3, 9, 9, 9]), 3);
        assert_eq!(report.improvements.len(), 4);
        assert_eq!(report.strengths.len(), 3);
        for strength in &report.strengths {
            assert!(!report.improvements.contains(strength));
        }
    }

    #[test]
    fn test_build_report_without_strengths() {
        let report = build_report(assessment([1, 1, 1, 1, 1, 1, 1]), 3);
        assert!(report.strengths.is_empty());
        assert_eq!(report.improvements.len(), 7);
    }

    #[test]
    fn test_note_tally_scores() {
        let session = session_with(
            &["Hello", "How long has this been going on?"],
            &[
                "[+] Warm introduction built rapport.",
                "[+] Good question on onset and duration.",
                "[-] Missed a chance to explore the timeline of symptoms.",
            ],
        );
        let assessment = NoteTallyScorer.assess(&session);
        assert_eq!(assessment.scores[0].score, 6);
        assert_eq!(assessment.scores[1].score, 5);
        assert_eq!(assessment.scores[1].feedback, "Based on 2 observations.");
        assert_eq!(assessment.scores[6].score, 5);
        assert!(assessment.summary.contains("2 positive, 1 negative"));
    }

    #[test]
    fn test_risk_explored() {
        assert!(!risk_explored(&session_with(&["How is your sleep?"], &[])));
        assert!(risk_explored(&session_with(
            &["Have you had any thoughts of suicide?"],
            &[]
        )));
        assert!(risk_explored(&session_with(&["Do you ever hurt yourself?"], &[])));
        for question in [
            "Have you had any thoughts of hurting yourself?",
            "Do you ever feel like you want to die?",
            "Have you thought about ending it all?",
            "Do you ever wish you were dead?",
        ] {
            assert!(risk_explored(&session_with(&["Hello", question], &[])), "missed: {question}");
        }
    }

    #[tokio::test]
    async fn test_finalize_keeps_risk_for_indirect_phrasings() {
        let aggregator = GradeAggregator::new(
            Arc::new(FixedScorer(assessment([9; 7]))),
            3,
            Duration::from_secs(1),
        );
        for question in [
            "Have you had any thoughts of hurting yourself?",
            "Do you ever wish you were dead?",
        ] {
            let report = aggregator.finalize(&session_with(&[question], &[])).await;
            assert_eq!(report.criteria[2].score, 9, "capped after: {question}");
            assert!(!report.criteria[2].feedback.contains("never asked"));
        }
    }

    #[tokio::test]
    async fn test_finalize_rejects_incomplete_scorer_output() {
        let mut partial = assessment([9; 7]);
        partial.scores.truncate(4);
        let aggregator = GradeAggregator::new(Arc::new(FixedScorer(partial)), 3, Duration::from_secs(1));
        let session = session_with(&["Hello"], &["[+] Warm greeting."]);
        let report = aggregator.finalize(&session).await;
        let tally = GradeAggregator::new(Arc::new(FailingScorer), 3, Duration::from_secs(1))
            .finalize(&session)
            .await;
        assert_eq!(report, tally);
        assert_eq!(report.criteria.len(), 7);

        let mut duplicated = assessment([9; 7]);
        duplicated.scores[6].dimension = RubricDimension::Rapport;
        assert!(!duplicated.covers_rubric());
    }

    #[tokio::test]
    async fn test_finalize_clamps_out_of_range_scores() {
        let aggregator = GradeAggregator::new(
            Arc::new(FixedScorer(assessment([40, 12, 11, 10, 10, 10, 255]))),
            3,
            Duration::from_secs(1),
        );
        let report = aggregator
            .finalize(&session_with(&["Have you had thoughts of suicide?"], &[]))
            .await;
        assert_eq!(report.overall_score, 100);
        assert!(report.criteria.iter().all(|c| c.score <= MAX_DIMENSION_SCORE));
        assert_eq!(report.letter_grade, LetterGrade::A);
    }

    #[tokio::test]
    async fn test_finalize_caps_unexplored_risk() {
        let aggregator = GradeAggregator::new(
            Arc::new(FixedScorer(assessment([8, 7, 9, 5, 6, 9, 8]))),
            3,
            Duration::from_secs(1),
        );
        let session = session_with(&["Hi James", "How often do you wash?"], &[]);
        let report = aggregator.finalize(&session).await;

        let risk = &report.criteria[2];
        assert_eq!(risk.criterion, "Risk Assessment");
        assert!(risk.score <= 3);
        assert!(report.improvements.iter().any(|i| i.starts_with("Risk Assessment")));
        assert!(!report.strengths.iter().any(|s| s.starts_with("Risk Assessment")));
    }

    #[tokio::test]
    async fn test_finalize_keeps_explored_risk() {
        let aggregator = GradeAggregator::new(
            Arc::new(FixedScorer(assessment([8, 7, 9, 5, 6, 9, 8]))),
            3,
            Duration::from_secs(1),
        );
        let session = session_with(&["Have you thought about suicide?"], &[]);
        let report = aggregator.finalize(&session).await;
        assert_eq!(report.criteria[2].score, 9);
    }

    #[tokio::test]
    async fn test_finalize_falls_back_when_scorer_fails() {
        let aggregator = GradeAggregator::new(Arc::new(FailingScorer), 3, Duration::from_secs(1));
        let session = session_with(&["Hello"], &["[+] Warm greeting."]);
        let first = aggregator.finalize(&session).await;
        let second = aggregator.finalize(&session).await;
        assert_eq!(first, second);
        assert_eq!(first.criteria.len(), 7);
        assert_eq!(first.criteria[2].score, 3);
    }

    #[tokio::test]
    async fn test_llm_scorer_uses_backend_json() {
        let mut llm = MockLLMClient::new();
        llm.expect_complete().times(1).returning(|request| {
            assert_eq!(request.purpose, CompletionPurpose::FinalGrade);
            assert!(request.json_mode);
            assert!(request.messages[0].content.contains("Turn 1: [+] Warm greeting."));
            Ok(serde_json::json!({
                "summary": "Good start.",
                "criteria": RubricDimension::ALL
                    .iter()
                    .map(|d| serde_json::json!({"criterion": d.display_name(), "score": 7, "feedback": "ok"}))
                    .collect::<Vec<_>>()
            })
            .to_string())
        });
        let scorer = LlmRubricScorer::new(Arc::new(llm), Arc::new(StaticPromptRegistry::new()));
        let session = session_with(&["Hello"], &["[+] Warm greeting."]);
        let assessment = scorer.score(&session).await.unwrap();
        assert!(assessment.scores.iter().all(|s| s.score == 7));
        assert_eq!(assessment.summary, "Good start.");
    }
}
