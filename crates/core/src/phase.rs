//! Phase Router
//!
//! The interview moves through four ordered phases and never moves backwards.
//! The transition rules are a pure function over classifier signals; deciding
//! whether a message *is* a clinical question or a diagnosis statement is
//! delegated to a pluggable `UtteranceClassifier`. A classifier that fails or
//! stalls counts as "no", so the router can only ever hold or advance.

use crate::{
    llm_client::{ChatMessage, CompletionPurpose, CompletionRequest, LLMClient},
    prompts::{PromptRegistry, PromptRole, render, resolve_prompt},
    session::{Turn, transcript},
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{info, warn};

/// Sessions are forced into `debrief` once the turn count exceeds this.
pub const TURN_LIMIT: u32 = 20;

/// Stages of the clinical interview. Declaration order is the phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Introduction,
    Examination,
    Diagnosis,
    Debrief,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Introduction,
        Phase::Examination,
        Phase::Diagnosis,
        Phase::Debrief,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Introduction => "introduction",
            Phase::Examination => "examination",
            Phase::Diagnosis => "diagnosis",
            Phase::Debrief => "debrief",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Phase::Debrief
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown phase: '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

/// What a classifier can be asked about a student message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    EndOfInterview,
    ClinicalQuestion,
    DiagnosisStatement,
}

impl UtteranceKind {
    fn question(&self) -> &'static str {
        match self {
            UtteranceKind::EndOfInterview => {
                "Is the student explicitly ending or wrapping up the interview?"
            }
            UtteranceKind::ClinicalQuestion => {
                "Is this a clinical question about the patient's symptoms, history or risk, rather than a greeting or small talk?"
            }
            UtteranceKind::DiagnosisStatement => {
                "Is the student stating an assessment, a diagnosis or a treatment plan to the patient?"
            }
        }
    }
}

/// Boolean observations about the latest student message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSignals {
    pub end_requested: bool,
    pub clinical_question: bool,
    pub diagnosis_statement: bool,
}

/// The phase transition function.
///
/// Rules, in precedence order: `debrief` is terminal; an explicit end or a
/// turn count above [`TURN_LIMIT`] forces `debrief`; a clinical question
/// moves `introduction` to `examination`; a diagnosis statement moves
/// `examination` to `diagnosis`; otherwise the phase is unchanged.
pub fn transition(current: Phase, signals: PhaseSignals, turn_count: u32) -> Phase {
    let next = if current.is_terminal() || signals.end_requested || turn_count > TURN_LIMIT {
        Phase::Debrief
    } else {
        match current {
            Phase::Introduction if signals.clinical_question => Phase::Examination,
            Phase::Examination if signals.diagnosis_statement => Phase::Diagnosis,
            _ => current,
        }
    };
    next.max(current)
}

/// Context a classifier may use besides the message itself.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierContext<'a> {
    pub phase: Phase,
    pub recent: &'a [Turn],
}

/// Decides whether a student message is of a given kind.
#[async_trait]
pub trait UtteranceClassifier: Send + Sync {
    async fn classify(
        &self,
        kind: UtteranceKind,
        message: &str,
        context: ClassifierContext<'_>,
    ) -> Result<bool>;
}

/// Computes the next phase for a session, one student message at a time.
pub struct PhaseRouter {
    classifier: Arc<dyn UtteranceClassifier>,
    timeout: Duration,
}

impl PhaseRouter {
    pub fn new(classifier: Arc<dyn UtteranceClassifier>, timeout: Duration) -> Self {
        Self { classifier, timeout }
    }

    /// Returns the phase after a turn. `turn_count` includes the turn being
    /// committed, so the first turn of a session passes `1`.
    pub async fn next_phase(
        &self,
        current: Phase,
        message: &str,
        turn_count: u32,
        recent: &[Turn],
    ) -> Phase {
        if current.is_terminal() || turn_count > TURN_LIMIT {
            return transition(current, PhaseSignals::default(), turn_count);
        }

        let context = ClassifierContext {
            phase: current,
            recent,
        };
        let mut signals = PhaseSignals {
            end_requested: self
                .check(UtteranceKind::EndOfInterview, message, context)
                .await,
            ..PhaseSignals::default()
        };
        if !signals.end_requested {
            match current {
                Phase::Introduction => {
                    signals.clinical_question = self
                        .check(UtteranceKind::ClinicalQuestion, message, context)
                        .await;
                }
                Phase::Examination => {
                    signals.diagnosis_statement = self
                        .check(UtteranceKind::DiagnosisStatement, message, context)
                        .await;
                }
                Phase::Diagnosis | Phase::Debrief => {}
            }
        }

        let next = transition(current, signals, turn_count);
        if next != current {
            info!(from = %current, to = %next, turn_count, "Interview phase advanced");
        }
        next
    }

    async fn check(&self, kind: UtteranceKind, message: &str, context: ClassifierContext<'_>) -> bool {
        match tokio::time::timeout(self.timeout, self.classifier.classify(kind, message, context)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(?kind, error = ?e, "Utterance classification failed; assuming no transition");
                false
            }
            Err(_) => {
                warn!(?kind, "Utterance classification timed out; assuming no transition");
                false
            }
        }
    }
}

/// A deterministic phrase-matching classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    end_phrases: Vec<String>,
    clinical_cues: Vec<String>,
    diagnosis_cues: Vec<String>,
}

const END_PHRASES: &[&str] = &[
    "end the interview",
    "end the session",
    "end our session",
    "finish the interview",
    "conclude the interview",
    "that concludes",
    "that's all for today",
    "that is all for today",
    "we're done for today",
    "we are done for today",
    "let's wrap up",
    "let us wrap up",
];

const CLINICAL_CUES: &[&str] = &[
    "how many",
    "how often",
    "how long",
    "when did",
    "when do",
    "tell me about",
    "times a day",
    "symptom",
    "sleep",
    "appetite",
    "eating",
    "medication",
    "thought",
    "worr",
    "compuls",
    "obsess",
    "ritual",
    "wash",
    "clean",
    "checking",
    "counting",
    "germ",
    "contaminat",
    "mood",
    "anxi",
    "panic",
    "suicid",
    "self-harm",
    "harm yourself",
    "hurt yourself",
    "drink",
    "alcohol",
    "drug",
    "cannabis",
    "smok",
    "family history",
    "relationship",
    "stress",
    "history",
];

const DIAGNOSIS_CUES: &[&str] = &[
    "diagnos",
    "i think you have",
    "i think you might have",
    "you may have",
    "you might have",
    "sounds like you have",
    "consistent with",
    "we call this",
    "this is called",
    "obsessive-compulsive disorder",
    "obsessive compulsive disorder",
    "disorder",
    "treatment option",
    "treatment plan",
    "cognitive behavioural",
    "cognitive behavioral",
    "exposure and response",
    "ssri",
];

const INTERROGATIVE_OPENERS: &[&str] = &[
    "can you", "could you", "would you", "tell me", "do you", "did you", "have you", "are you",
    "is there", "how", "what", "when", "why", "where", "which",
];

impl Default for KeywordClassifier {
    fn default() -> Self {
        let own = |list: &[&str]| -> Vec<String> { list.iter().map(|s| s.to_string()).collect() };
        Self {
            end_phrases: own(END_PHRASES),
            clinical_cues: own(CLINICAL_CUES),
            diagnosis_cues: own(DIAGNOSIS_CUES),
        }
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(message: &str) -> String {
        message.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
    }

    fn contains_any(text: &str, cues: &[String]) -> bool {
        cues.iter().any(|cue| text.contains(cue.as_str()))
    }

    fn is_question(text: &str) -> bool {
        text.contains('?')
            || INTERROGATIVE_OPENERS
                .iter()
                .any(|opener| text.trim_start().starts_with(opener))
    }

    /// Synchronous classification, shared by the async trait impl.
    pub fn matches(&self, kind: UtteranceKind, message: &str) -> bool {
        let text = Self::normalize(message);
        match kind {
            UtteranceKind::EndOfInterview => Self::contains_any(&text, &self.end_phrases),
            UtteranceKind::ClinicalQuestion => {
                Self::is_question(&text) && Self::contains_any(&text, &self.clinical_cues)
            }
            UtteranceKind::DiagnosisStatement => Self::contains_any(&text, &self.diagnosis_cues),
        }
    }
}

#[async_trait]
impl UtteranceClassifier for KeywordClassifier {
    async fn classify(&self, kind: UtteranceKind, message: &str, _context: ClassifierContext<'_>) -> Result<bool> {
        Ok(self.matches(kind, message))
    }
}

/// Asks the generation backend a yes/no question, using the `phase_router`
/// registry prompt.
pub struct LlmUtteranceClassifier {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<dyn PromptRegistry>,
}

impl LlmUtteranceClassifier {
    pub fn new(llm: Arc<dyn LLMClient>, prompts: Arc<dyn PromptRegistry>) -> Self {
        Self { llm, prompts }
    }
}

/// Number of trailing turns shown to the LLM classifier.
const CLASSIFIER_WINDOW: usize = 3;

#[async_trait]
impl UtteranceClassifier for LlmUtteranceClassifier {
    async fn classify(&self, kind: UtteranceKind, message: &str, context: ClassifierContext<'_>) -> Result<bool> {
        let template = resolve_prompt(self.prompts.as_ref(), PromptRole::PhaseRouter).await;
        let window_start = context.recent.len().saturating_sub(CLASSIFIER_WINDOW);
        let recent_messages = transcript(&context.recent[window_start..]);
        let prompt = render(
            &template,
            &[
                ("current_phase", context.phase.as_str()),
                ("recent_messages", &recent_messages),
                ("message", message),
                ("question", kind.question()),
            ],
        );
        let request = CompletionRequest::new(
            CompletionPurpose::PhaseClassification,
            vec![ChatMessage::user(prompt)],
        )
        .temperature(0.0)
        .max_tokens(5);

        let answer = self.llm.complete(request).await?;
        let answer = answer.trim().to_lowercase();
        if answer.starts_with("yes") {
            Ok(true)
        } else if answer.starts_with("no") {
            Ok(false)
        } else {
            bail!("Unexpected classifier answer: '{answer}'")
        }
    }
}
