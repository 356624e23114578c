//! Grader Agent
//!
//! A silent observer that writes at most one short note per turn. It sees the
//! conversation and the newest student message, never the persona's hidden
//! facts or disclosure gates.

use crate::{
    llm_client::{ChatMessage, CompletionPurpose, CompletionRequest, LLMClient},
    prompts::{PromptRegistry, PromptRole, render, resolve_prompt},
    retrieval::{Collection, RetrievalGateway, render_passages, retrieve_bounded},
    session::{EvaluationNote, Turn, transcript},
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};

/// The seven dimensions every interview is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricDimension {
    Rapport,
    HistoryTaking,
    RiskAssessment,
    MentalStateExam,
    ClinicalReasoning,
    Communication,
    Professionalism,
}

impl RubricDimension {
    pub const ALL: [RubricDimension; 7] = [
        RubricDimension::Rapport,
        RubricDimension::HistoryTaking,
        RubricDimension::RiskAssessment,
        RubricDimension::MentalStateExam,
        RubricDimension::ClinicalReasoning,
        RubricDimension::Communication,
        RubricDimension::Professionalism,
    ];

    /// The criterion name used in prompts and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            RubricDimension::Rapport => "Rapport Building",
            RubricDimension::HistoryTaking => "History Taking",
            RubricDimension::RiskAssessment => "Risk Assessment",
            RubricDimension::MentalStateExam => "Mental State Examination",
            RubricDimension::ClinicalReasoning => "Clinical Reasoning",
            RubricDimension::Communication => "Communication Skills",
            RubricDimension::Professionalism => "Professionalism",
        }
    }

    /// Matches a criterion name as written by a scorer, ignoring case and
    /// punctuation. Either name may extend the other by whole words, so
    /// "Communication" and "Mental State Examination (MSE)" both match while
    /// a fragment such as "c" does not.
    pub fn from_name(name: &str) -> Option<Self> {
        fn words(text: &str) -> Vec<String> {
            text.split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect()
        }
        let given = words(name);
        if given.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|dim| {
            let full = words(dim.display_name());
            given.starts_with(&full) || full.starts_with(&given)
        })
    }

    /// Phrases that tie an observation note to this dimension.
    pub fn cues(&self) -> &'static [&'static str] {
        match self {
            RubricDimension::Rapport => &["rapport", "empath", "warm", "introduc", "greet", "trust"],
            RubricDimension::HistoryTaking => {
                &["history", "onset", "duration", "timeline", "background", "symptom", "trigger"]
            }
            RubricDimension::RiskAssessment => {
                &["risk", "suicid", "self-harm", "self harm", "safety", "substance", "cannabis"]
            }
            RubricDimension::MentalStateExam => {
                &["mental state", "mse", "mood", "affect", "insight", "perception", "appearance"]
            }
            RubricDimension::ClinicalReasoning => {
                &["reasoning", "diagnos", "formulation", "differential", "hypothes", "assessment"]
            }
            RubricDimension::Communication => {
                &["open question", "open-ended", "closed question", "jargon", "clear", "listen", "summar"]
            }
            RubricDimension::Professionalism => {
                &["professional", "respect", "boundar", "consent", "confidential", "dignity"]
            }
        }
    }
}

impl fmt::Display for RubricDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// What the grader is shown for one turn. Owned so it can move into a
/// background task.
#[derive(Debug, Clone)]
pub struct GradingInput {
    /// Committed turns before this one, oldest first.
    pub history: Vec<Turn>,
    pub summary: Option<String>,
    pub student_message: String,
    pub turn: u32,
}

/// Contract for the per-turn evaluator.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Returns zero or one note for the turn.
    async fn evaluate(&self, input: &GradingInput) -> Result<Option<EvaluationNote>>;
}

/// Grades through the generation backend using the `professor_grader` prompt
/// and retrieved grading-criteria passages.
pub struct LlmGrader {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<dyn PromptRegistry>,
    retrieval: Arc<dyn RetrievalGateway>,
    retrieval_timeout: Duration,
}

impl LlmGrader {
    const CRITERIA_TOP_K: usize = 3;

    pub fn new(
        llm: Arc<dyn LLMClient>,
        prompts: Arc<dyn PromptRegistry>,
        retrieval: Arc<dyn RetrievalGateway>,
        retrieval_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            prompts,
            retrieval,
            retrieval_timeout,
        }
    }
}

#[async_trait]
impl Grader for LlmGrader {
    async fn evaluate(&self, input: &GradingInput) -> Result<Option<EvaluationNote>> {
        let criteria = retrieve_bounded(
            self.retrieval.as_ref(),
            Collection::GradingCriteria,
            &input.student_message,
            Self::CRITERIA_TOP_K,
            self.retrieval_timeout,
        )
        .await;
        let template = resolve_prompt(self.prompts.as_ref(), PromptRole::ProfessorGrader).await;
        let system = render(
            &template,
            &[
                ("grading_criteria", &render_passages(&criteria)),
                ("summary", input.summary.as_deref().unwrap_or("None.")),
            ],
        );
        let conversation = if input.history.is_empty() {
            "(this is the first message)".to_string()
        } else {
            transcript(&input.history)
        };
        let user = format!(
            "Conversation so far:\n{conversation}\nLatest student message (turn {}): \"{}\"",
            input.turn, input.student_message
        );

        let request = CompletionRequest::new(
            CompletionPurpose::TurnNote,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .temperature(0.3)
        .max_tokens(120);
        let raw = self.llm.complete(request).await?;
        Ok(EvaluationNote::from_grader_output(input.turn, &raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm_client::MockLLMClient, prompts::StaticPromptRegistry, retrieval::NoRetrieval,
        session::Polarity,
    };
    use chrono::Utc;

    fn grader(llm: MockLLMClient) -> LlmGrader {
        LlmGrader::new(
            Arc::new(llm),
            Arc::new(StaticPromptRegistry::new()),
            Arc::new(NoRetrieval),
            Duration::from_millis(100),
        )
    }

    fn input(history: Vec<Turn>, message: &str) -> GradingInput {
        GradingInput {
            turn: history.len() as u32 + 1,
            history,
            summary: None,
            student_message: message.to_string(),
        }
    }

    #[test]
    fn test_dimension_name_matching() {
        assert_eq!(RubricDimension::from_name("Risk Assessment"), Some(RubricDimension::RiskAssessment));
        assert_eq!(RubricDimension::from_name("communication"), Some(RubricDimension::Communication));
        assert_eq!(
            RubricDimension::from_name("Mental State Examination (MSE)"),
            Some(RubricDimension::MentalStateExam)
        );
        assert_eq!(RubricDimension::from_name("Bedside Manner"), None);
        assert_eq!(RubricDimension::from_name("c"), None);
        assert_eq!(RubricDimension::from_name("Comm"), None);
        assert_eq!(RubricDimension::from_name("Risk"), Some(RubricDimension::RiskAssessment));
        assert_eq!(RubricDimension::from_name("clinical reasoning:"), Some(RubricDimension::ClinicalReasoning));
        assert_eq!(RubricDimension::from_name(""), None);
    }

    #[tokio::test]
    async fn test_grader_builds_note_from_output() {
        let mut llm = MockLLMClient::new();
        llm.expect_complete().times(1).returning(|request| {
            assert_eq!(request.purpose, CompletionPurpose::TurnNote);
            assert!(request.messages[1].content.contains("How often do you wash?"));
            assert!(request.messages[1].content.contains("STUDENT: Hello"));
            Ok("[+] Good focused question on frequency.".to_string())
        });

        let history = vec![Turn {
            index: 1,
            student: "Hello".into(),
            persona: "Hi.".into(),
            created_at: Utc::now(),
        }];
        let note = grader(llm)
            .evaluate(&input(history, "How often do you wash?"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.turn, 2);
        assert_eq!(note.polarity, Some(Polarity::Positive));
    }

    #[tokio::test]
    async fn test_blank_output_is_no_note() {
        let mut llm = MockLLMClient::new();
        llm.expect_complete().returning(|_| Ok("   ".to_string()));
        let note = grader(llm).evaluate(&input(vec![], "Hi")).await.unwrap();
        assert!(note.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_is_an_error() {
        let mut llm = MockLLMClient::new();
        llm.expect_complete().returning(|_| Err(anyhow::anyhow!("rate limited")));
        assert!(grader(llm).evaluate(&input(vec![], "Hi")).await.is_err());
    }
}
