//! Prompt Registry
//!
//! Behavioural configuration for each agent lives in a versioned, externally
//! editable registry keyed by role. Registries are consulted on every use, so
//! edits take effect for the next turn without a restart. If every source
//! fails, the built-in fallback text for the role is used.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};
use tracing::{debug, warn};

/// The logical roles that read their instructions from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptRole {
    PatientPersona,
    ProfessorGrader,
    PhaseRouter,
    FinalGrader,
    Summarizer,
    SessionTitle,
}

impl PromptRole {
    pub const ALL: [PromptRole; 6] = [
        PromptRole::PatientPersona,
        PromptRole::ProfessorGrader,
        PromptRole::PhaseRouter,
        PromptRole::FinalGrader,
        PromptRole::Summarizer,
        PromptRole::SessionTitle,
    ];

    /// The registry key, also used as the prompt file stem.
    pub fn key(&self) -> &'static str {
        match self {
            PromptRole::PatientPersona => "patient_persona",
            PromptRole::ProfessorGrader => "professor_grader",
            PromptRole::PhaseRouter => "phase_router",
            PromptRole::FinalGrader => "final_grader",
            PromptRole::Summarizer => "summarizer",
            PromptRole::SessionTitle => "session_title",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.key() == key)
    }

    /// Built-in template used when no registry source has the role.
    pub fn fallback(&self) -> &'static str {
        match self {
            PromptRole::PatientPersona => FALLBACK_PATIENT_PERSONA,
            PromptRole::ProfessorGrader => FALLBACK_PROFESSOR_GRADER,
            PromptRole::PhaseRouter => FALLBACK_PHASE_ROUTER,
            PromptRole::FinalGrader => FALLBACK_FINAL_GRADER,
            PromptRole::Summarizer => FALLBACK_SUMMARIZER,
            PromptRole::SessionTitle => FALLBACK_SESSION_TITLE,
        }
    }
}

const FALLBACK_PATIENT_PERSONA: &str = "\
You are James, a 21-year-old university student attending a psychiatry clinic. \
You live with obsessive-compulsive disorder: intrusive fears of contamination and \
hand-washing rituals that take hours every day. You are anxious and a little \
embarrassed. Answer in one to three short sentences, like a real patient.

Stay in character. Never say you are an AI or a simulation, never diagnose \
yourself, and never volunteer information you have not been asked about.

Interview phase: {phase}

About you:
{patient_context}

Clinical reference (for consistency only, never quote it):
{medical_context}

Earlier in this conversation:
{summary}

{disclosures}";

const FALLBACK_PROFESSOR_GRADER: &str = "\
You are Dr. Williams, a senior psychiatry professor observing a student's clinical \
interview from behind a one-way mirror. You never speak to the patient.

Rubric: Rapport Building, History Taking, Risk Assessment (suicidal ideation, \
self-harm, substance use), Mental State Examination, Clinical Reasoning, \
Communication Skills, Professionalism.

Clinical guidelines:
{grading_criteria}

Earlier in this conversation:
{summary}

Assess the student's LATEST message in one to three sentences. Start with [+] for \
good practice, [~] for adequate, [-] for a gap. Output only the note.";

const FALLBACK_PHASE_ROUTER: &str = "\
You classify one message from a medical student interviewing a psychiatric patient.

Current phase: {current_phase}
Recent conversation:
{recent_messages}

Student message: \"{message}\"

Question: {question}
Answer with exactly one word: yes or no.";

const FALLBACK_FINAL_GRADER: &str = "\
You are Dr. Williams. The clinical interview has ended. Using your observation \
notes and the transcript, score the student.

Observation notes:
{professor_notes}

Transcript:
{transcript}

Reply with a JSON object: {\"summary\": \"<2-3 sentences>\", \"criteria\": \
[{\"criterion\": \"<name>\", \"score\": <0-10>, \"feedback\": \"<specific feedback>\"}]}. \
The criteria MUST be: Rapport Building, History Taking, Risk Assessment, Mental State \
Examination, Clinical Reasoning, Communication Skills, Professionalism.";

const FALLBACK_SUMMARIZER: &str = "\
You are a clinical scribe. Summarise the older part of an interview between a \
student doctor (STUDENT) and a patient (PATIENT). Keep symptoms, history, rapport \
dynamics and clinical flags.

Previous summary:
{previous_summary}

New messages:
{messages_to_summarize}

Return only the combined summary paragraph.";

const FALLBACK_SESSION_TITLE: &str = "\
Summarise this exchange into a short, professional, 3-5 word title for a clinical \
interview session. Do not use quotes.

Student: {student}
Patient: {patient}";

/// A prompt as stored in a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedPrompt {
    pub role: PromptRole,
    pub version: i64,
    pub content: String,
}

/// A read-mostly source of prompt text.
#[async_trait]
pub trait PromptRegistry: Send + Sync {
    /// Looks up the current prompt for `role`; `Ok(None)` if the source has none.
    async fn lookup(&self, role: PromptRole) -> Result<Option<VersionedPrompt>>;
}

/// Resolves the prompt for `role`, falling back to the built-in text.
pub async fn resolve_prompt(registry: &dyn PromptRegistry, role: PromptRole) -> String {
    match registry.lookup(role).await {
        Ok(Some(prompt)) => {
            debug!(role = role.key(), version = prompt.version, "Resolved prompt");
            prompt.content
        }
        Ok(None) => {
            debug!(role = role.key(), "Prompt not in registry; using built-in text");
            role.fallback().to_string()
        }
        Err(e) => {
            warn!(role = role.key(), error = ?e, "Prompt registry failure; using built-in text");
            role.fallback().to_string()
        }
    }
}

/// Fills `{name}` placeholders in a single pass.
///
/// Unknown placeholders and stray braces are left untouched, and substituted
/// values are never re-scanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}');
        let replacement = close.and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replacement {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Reads `<dir>/<role>.md` on every lookup. The version is the file's
/// modification time in seconds.
pub struct DirectoryPromptRegistry {
    dir: PathBuf,
}

impl DirectoryPromptRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl PromptRegistry for DirectoryPromptRegistry {
    async fn lookup(&self, role: PromptRole) -> Result<Option<VersionedPrompt>> {
        let path = self.dir.join(format!("{}.md", role.key()));
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Cannot stat {}", path.display())),
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let version = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(Some(VersionedPrompt {
            role,
            version,
            content,
        }))
    }
}

/// An in-memory registry, handy for tests and for pinning prompts in code.
#[derive(Debug, Clone, Default)]
pub struct StaticPromptRegistry {
    prompts: HashMap<PromptRole, String>,
}

impl StaticPromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: PromptRole, content: impl Into<String>) -> Self {
        self.prompts.insert(role, content.into());
        self
    }
}

#[async_trait]
impl PromptRegistry for StaticPromptRegistry {
    async fn lookup(&self, role: PromptRole) -> Result<Option<VersionedPrompt>> {
        Ok(self.prompts.get(&role).map(|content| VersionedPrompt {
            role,
            version: 0,
            content: content.clone(),
        }))
    }
}

/// Consults several registries in order; the first one with an entry wins.
/// A failing layer is logged and skipped.
pub struct LayeredPromptRegistry {
    layers: Vec<Arc<dyn PromptRegistry>>,
}

impl LayeredPromptRegistry {
    pub fn new(layers: Vec<Arc<dyn PromptRegistry>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl PromptRegistry for LayeredPromptRegistry {
    async fn lookup(&self, role: PromptRole) -> Result<Option<VersionedPrompt>> {
        for layer in &self.layers {
            match layer.lookup(role).await {
                Ok(Some(prompt)) => return Ok(Some(prompt)),
                Ok(None) => continue,
                Err(e) => warn!(role = role.key(), error = ?e, "Prompt layer failed; trying next"),
            }
        }
        Ok(None)
    }
}
