//! Persona Response Generator
//!
//! The simulated patient withholds a fixed set of hidden facts until the
//! student asks about them directly. Gating is plain data: each fact carries
//! its trigger phrases and its disclosure text, the policy is evaluated
//! against the latest student message, and only unlocked facts ever reach the
//! generation prompt.

use crate::{
    llm_client::{ChatMessage, CompletionPurpose, CompletionRequest, LLMClient, LLMStream},
    phase::Phase,
    prompts::{PromptRegistry, PromptRole, render, resolve_prompt},
    retrieval::{ReferenceBundle, render_passages},
    risk::is_risk_question,
    session::Turn,
};
use anyhow::Result;
use std::sync::Arc;

/// What unlocks a hidden fact.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Lower-case phrases; any one of them in the student message unlocks the fact.
    Phrases(Vec<String>),
    /// A question about suicidal ideation or self-harm.
    RiskQuestion,
}

/// Something the persona knows but will only share when asked directly.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenFact {
    pub id: String,
    pub trigger: Trigger,
    pub disclosure: String,
}

impl HiddenFact {
    pub fn new(id: impl Into<String>, triggers: &[&str], disclosure: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trigger: Trigger::Phrases(triggers.iter().map(|t| t.to_lowercase()).collect()),
            disclosure: disclosure.into(),
        }
    }

    /// A fact unlocked by any question about suicide or self-harm.
    pub fn on_risk_question(id: impl Into<String>, disclosure: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trigger: Trigger::RiskQuestion,
            disclosure: disclosure.into(),
        }
    }

    pub fn is_triggered(&self, message: &str) -> bool {
        match &self.trigger {
            Trigger::Phrases(phrases) => {
                let message = message.to_lowercase();
                phrases.iter().any(|t| message.contains(t.as_str()))
            }
            Trigger::RiskQuestion => is_risk_question(message),
        }
    }
}

/// The gating decision for one fact on one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FactGate {
    pub fact_id: String,
    pub unlocked: bool,
    pub disclosure: String,
}

/// The set of hidden facts for a persona.
#[derive(Debug, Clone, Default)]
pub struct DisclosurePolicy {
    facts: Vec<HiddenFact>,
}

impl DisclosurePolicy {
    pub fn new(facts: Vec<HiddenFact>) -> Self {
        Self { facts }
    }

    /// The default persona: James, 21, presenting with OCD.
    pub fn james() -> Self {
        Self::new(vec![
            HiddenFact::on_risk_question(
                "passive_ideation",
                "On the worst days you have thought everyone would be better off if you weren't \
                 around. You have no plan and have never acted on it, and you feel ashamed saying it.",
            ),
            HiddenFact::new(
                "substance_use",
                &[
                    "drink",
                    "alcohol",
                    "drug",
                    "cannabis",
                    "weed",
                    "marijuana",
                    "smok",
                    "substance",
                    "recreational",
                ],
                "You smoke cannabis most evenings to switch your brain off, more since the \
                 rituals got worse.",
            ),
            HiddenFact::new(
                "family_history",
                &[
                    "family history",
                    "anyone in your family",
                    "your family",
                    "your parents",
                    "your mother",
                    "your mum",
                    "your mom",
                    "your father",
                    "your dad",
                    "relatives",
                    "run in the family",
                    "runs in the family",
                ],
                "Your mother has strict cleaning routines of her own and was treated for \
                 anxiety when you were a child.",
            ),
            HiddenFact::new(
                "relationship_strain",
                &[
                    "relationship",
                    "girlfriend",
                    "boyfriend",
                    "partner",
                    "dating",
                    "friends",
                    "social life",
                    "close to",
                ],
                "Your girlfriend of two years moved out last month, saying she could not cope \
                 with the rituals any more.",
            ),
        ])
    }

    pub fn facts(&self) -> &[HiddenFact] {
        &self.facts
    }

    /// Evaluates every fact's trigger against the latest student message.
    pub fn evaluate(&self, student_message: &str) -> Vec<FactGate> {
        self.facts
            .iter()
            .map(|fact| FactGate {
                fact_id: fact.id.clone(),
                unlocked: fact.is_triggered(student_message),
                disclosure: fact.disclosure.clone(),
            })
            .collect()
    }
}

/// Prompt text granting permission to share the unlocked facts. Locked facts
/// contribute nothing.
pub fn disclosure_block(gates: &[FactGate]) -> String {
    let unlocked: Vec<&FactGate> = gates.iter().filter(|g| g.unlocked).collect();
    if unlocked.is_empty() {
        return String::new();
    }
    let mut block = String::from(
        "The student has just asked you directly about the following. You may share it now, hesitantly and in your own words:\n",
    );
    for gate in unlocked {
        block.push_str("- ");
        block.push_str(&gate.disclosure);
        block.push('\n');
    }
    block
}

/// Everything the generator needs for one reply.
#[derive(Debug, Clone, Copy)]
pub struct PersonaRequest<'a> {
    pub phase: Phase,
    pub summary: Option<&'a str>,
    /// Turns still inside the prompt window, oldest first.
    pub history: &'a [Turn],
    pub student_message: &'a str,
    pub references: &'a ReferenceBundle,
    pub gates: &'a [FactGate],
}

/// Fills the persona template for a request.
pub fn build_system_prompt(template: &str, request: &PersonaRequest<'_>) -> String {
    let patient_context = render_passages(&request.references.patient_context);
    let medical_context = render_passages(&request.references.medical_context);
    let disclosures = disclosure_block(request.gates);
    render(
        template,
        &[
            ("phase", request.phase.as_str()),
            ("patient_context", &patient_context),
            ("medical_context", &medical_context),
            ("summary", request.summary.unwrap_or("None available yet.")),
            ("disclosures", &disclosures),
        ],
    )
}

/// Streams the persona's in-character reply.
pub struct PersonaGenerator {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<dyn PromptRegistry>,
}

impl PersonaGenerator {
    const TEMPERATURE: f32 = 0.7;
    const MAX_TOKENS: u32 = 150;

    pub fn new(llm: Arc<dyn LLMClient>, prompts: Arc<dyn PromptRegistry>) -> Self {
        Self { llm, prompts }
    }

    /// Starts a fresh generation. The returned stream is lazy, finite and
    /// forward-only.
    pub async fn generate(&self, request: PersonaRequest<'_>) -> Result<LLMStream> {
        let template = resolve_prompt(self.prompts.as_ref(), PromptRole::PatientPersona).await;
        let mut messages = vec![ChatMessage::system(build_system_prompt(&template, &request))];
        for turn in request.history {
            messages.push(ChatMessage::user(turn.student.clone()));
            messages.push(ChatMessage::assistant(turn.persona.clone()));
        }
        messages.push(ChatMessage::user(request.student_message));

        let request = CompletionRequest::new(CompletionPurpose::Persona, messages)
            .temperature(Self::TEMPERATURE)
            .max_tokens(Self::MAX_TOKENS);
        self.llm.stream(request).await
    }
}
