//! Turn Orchestrator
//!
//! Sequences one turn: the grader starts in the background, the persona reply
//! streams to the caller fragment by fragment, then the phase is routed on
//! the completed exchange and the turn is committed in one store call before
//! the terminal event is sent. Every turn and every finalisation holds the
//! session's in-flight guard, so each session has a single writer.

use crate::{
    error::SimulationError,
    grader::{Grader, GradingInput, LlmGrader},
    grading::{DEFAULT_RISK_CEILING, GradeAggregator, GradeReport, LlmRubricScorer, RubricScorer},
    llm_client::{LLMClient, LLMStreamEvent},
    persona::{DisclosurePolicy, PersonaGenerator, PersonaRequest},
    phase::{Phase, PhaseRouter, UtteranceClassifier},
    prompts::PromptRegistry,
    retrieval::{ReferenceBundle, RetrievalGateway},
    session::{EvaluationNote, SessionSummary, SimulationSession, Turn},
    store::{FinalizeOutcome, SessionStore, SummaryUpdate, TurnCommit},
    summarizer::{ConversationSummarizer, plan_compaction},
};
use chrono::Utc;
use futures::StreamExt;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Shown to the student when a session starts.
pub const OPENING_MESSAGE: &str = "You are about to interview James, a 21-year-old university student who \
has been referred to the psychiatry clinic. Introduce yourself and begin the consultation. \
When you are finished, tell James you would like to end the interview.";

/// One event of a turn's stream. Exactly one `Done` or `Error` ends it.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Token(String),
    Done {
        phase: Phase,
        turn_count: u32,
        professor_note: Option<String>,
    },
    Error(String),
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Token(_))
    }
}

/// Time limits and sizes for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retrieval_timeout: Duration,
    pub grader_timeout: Duration,
    pub classifier_timeout: Duration,
    pub summary_timeout: Duration,
    pub scoring_timeout: Duration,
    pub retrieval_top_k: usize,
    pub max_message_chars: usize,
    pub risk_ceiling: u8,
    pub event_buffer: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retrieval_timeout: Duration::from_millis(2000),
            grader_timeout: Duration::from_millis(8000),
            classifier_timeout: Duration::from_millis(3000),
            summary_timeout: Duration::from_millis(8000),
            scoring_timeout: Duration::from_secs(30),
            retrieval_top_k: 3,
            max_message_chars: 4000,
            risk_ceiling: DEFAULT_RISK_CEILING,
            event_buffer: 64,
        }
    }
}

/// The external collaborators an orchestrator is built from.
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub llm: Arc<dyn LLMClient>,
    pub prompts: Arc<dyn PromptRegistry>,
    pub retrieval: Arc<dyn RetrievalGateway>,
    pub classifier: Arc<dyn UtteranceClassifier>,
}

/// A freshly created session and the message to show with it.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: SimulationSession,
    pub opening_message: &'static str,
}

/// Session ids with a turn or finalisation in flight.
#[derive(Debug, Default)]
struct InFlightSessions {
    active: Mutex<HashSet<Uuid>>,
}

impl InFlightSessions {
    fn try_acquire(self: &Arc<Self>, id: Uuid) -> Option<InFlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(id).then(|| InFlightGuard {
            sessions: Arc::clone(self),
            id,
        })
    }
}

/// Releases the session when dropped.
#[derive(Debug)]
struct InFlightGuard {
    sessions: Arc<InFlightSessions>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.sessions
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Why a turn stopped before committing.
enum TurnAbort {
    Disconnected,
    Failed(SimulationError),
}

struct CommittedTurn {
    phase: Phase,
    turn_count: u32,
    note: Option<EvaluationNote>,
    turn: Turn,
}

pub struct TurnOrchestrator {
    store: Arc<dyn SessionStore>,
    retrieval: Arc<dyn RetrievalGateway>,
    router: PhaseRouter,
    persona: PersonaGenerator,
    policy: DisclosurePolicy,
    grader: Arc<dyn Grader>,
    aggregator: GradeAggregator,
    summarizer: Arc<ConversationSummarizer>,
    in_flight: Arc<InFlightSessions>,
    settings: OrchestratorSettings,
}

impl TurnOrchestrator {
    /// Wires the backend-driven grader, scorer and summariser around the
    /// given collaborators, with the default persona.
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        let Collaborators {
            store,
            llm,
            prompts,
            retrieval,
            classifier,
        } = collaborators;
        let grader = Arc::new(LlmGrader::new(
            Arc::clone(&llm),
            Arc::clone(&prompts),
            Arc::clone(&retrieval),
            settings.retrieval_timeout,
        ));
        let scorer = Arc::new(LlmRubricScorer::new(Arc::clone(&llm), Arc::clone(&prompts)));
        Self {
            store,
            router: PhaseRouter::new(classifier, settings.classifier_timeout),
            persona: PersonaGenerator::new(Arc::clone(&llm), Arc::clone(&prompts)),
            policy: DisclosurePolicy::james(),
            grader,
            aggregator: GradeAggregator::new(scorer, settings.risk_ceiling, settings.scoring_timeout),
            summarizer: Arc::new(ConversationSummarizer::new(llm, prompts)),
            retrieval,
            in_flight: Arc::default(),
            settings,
        }
    }

    pub fn with_grader(mut self, grader: Arc<dyn Grader>) -> Self {
        self.grader = grader;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RubricScorer>) -> Self {
        self.aggregator = GradeAggregator::new(scorer, self.settings.risk_ceiling, self.settings.scoring_timeout);
        self
    }

    pub fn with_disclosure_policy(mut self, policy: DisclosurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn start_session(&self, user_id: &str) -> Result<StartedSession, SimulationError> {
        if user_id.trim().is_empty() {
            return Err(SimulationError::Validation("user id must not be empty".into()));
        }
        let session = SimulationSession::new(Uuid::new_v4(), user_id);
        self.store.create_session(&session).await?;
        info!(session_id = %session.id, user_id, "Session started");
        Ok(StartedSession {
            session,
            opening_message: OPENING_MESSAGE,
        })
    }

    pub async fn fetch_session(&self, user_id: &str, session_id: Uuid) -> Result<SimulationSession, SimulationError> {
        self.load_owned(user_id, session_id).await
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, SimulationError> {
        Ok(self.store.list_sessions(user_id).await?)
    }

    /// Starts a turn and returns its event stream.
    ///
    /// Validation, ownership, conflict and already-ended failures are returned
    /// here, before any work starts. Everything after that is reported on the
    /// stream.
    pub async fn submit_turn(
        self: &Arc<Self>,
        user_id: &str,
        session_id: Uuid,
        message: &str,
    ) -> Result<ReceiverStream<TurnEvent>, SimulationError> {
        let message = self.validate_message(message)?;
        let (guard, session) = self.claim(user_id, session_id).await?;

        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let span = info_span!(
            "turn",
            session_id = %session_id,
            turn = session.turn_count + 1,
            phase = %session.phase
        );
        let orchestrator = Arc::clone(self);
        tokio::spawn(orchestrator.run_turn(session, message, tx, guard).instrument(span));
        Ok(ReceiverStream::new(rx))
    }

    /// Grades the session and marks it ended. A second call fails with
    /// `AlreadyEnded` and leaves the stored report untouched.
    pub async fn end_session(&self, user_id: &str, session_id: Uuid) -> Result<GradeReport, SimulationError> {
        let (_guard, session) = self.claim(user_id, session_id).await?;

        let report = self.aggregator.finalize(&session).await;
        match self.store.finalize_session(session_id, &report).await? {
            FinalizeOutcome::Finalized => {
                info!(
                    session_id = %session_id,
                    overall_score = report.overall_score,
                    letter = %report.letter_grade,
                    "Session finalised"
                );
                Ok(report)
            }
            FinalizeOutcome::AlreadyEnded => Err(SimulationError::AlreadyEnded(session_id)),
        }
    }

    fn validate_message(&self, message: &str) -> Result<String, SimulationError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SimulationError::Validation("message must not be empty".into()));
        }
        let chars = message.chars().count();
        if chars > self.settings.max_message_chars {
            return Err(SimulationError::Validation(format!(
                "message is {chars} characters; the limit is {}",
                self.settings.max_message_chars
            )));
        }
        Ok(message.to_string())
    }

    /// Takes the session's in-flight guard on behalf of its owner.
    ///
    /// Ownership is checked before the guard is touched, so a foreign caller
    /// sees `UnknownSession` whether or not a turn is running. The session is
    /// reloaded under the guard because a turn may have committed in between.
    async fn claim(&self, user_id: &str, session_id: Uuid) -> Result<(InFlightGuard, SimulationSession), SimulationError> {
        self.load_owned(user_id, session_id).await?;
        let guard = self
            .in_flight
            .try_acquire(session_id)
            .ok_or(SimulationError::ConcurrencyConflict(session_id))?;
        let session = self.load_owned(user_id, session_id).await?;
        if session.ended {
            return Err(SimulationError::AlreadyEnded(session_id));
        }
        Ok((guard, session))
    }

    async fn load_owned(&self, user_id: &str, session_id: Uuid) -> Result<SimulationSession, SimulationError> {
        self.store
            .load_session(session_id)
            .await?
            .filter(|session| session.user_id == user_id)
            .ok_or(SimulationError::UnknownSession(session_id))
    }

    async fn run_turn(
        self: Arc<Self>,
        session: SimulationSession,
        message: String,
        tx: mpsc::Sender<TurnEvent>,
        guard: InFlightGuard,
    ) {
        let result = self.execute_turn(&session, &message, &tx).await;
        // The commit (or the decision not to commit) is final here.
        drop(guard);

        match result {
            Ok(committed) => {
                info!(turn_count = committed.turn_count, phase = %committed.phase, "Turn committed");
                if committed.turn_count == 1 {
                    self.spawn_title(session.id, committed.turn.clone());
                }
                let done = TurnEvent::Done {
                    phase: committed.phase,
                    turn_count: committed.turn_count,
                    professor_note: committed.note.map(|n| n.text),
                };
                if tx.send(done).await.is_err() {
                    info!("Client left before the done event; turn is already committed");
                }
            }
            Err(TurnAbort::Disconnected) => {
                info!("Client disconnected mid-stream; turn discarded");
            }
            Err(TurnAbort::Failed(e)) => {
                error!(error = %e, "Turn failed; nothing persisted");
                let _ = tx.send(TurnEvent::Error(e.to_string())).await;
            }
        }
    }

    async fn execute_turn(
        &self,
        session: &SimulationSession,
        message: &str,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<CommittedTurn, TurnAbort> {
        let turn_index = session.turn_count + 1;

        // Detached on abort: the grader may finish but its note is dropped.
        let grading = {
            let grader = Arc::clone(&self.grader);
            let limit = self.settings.grader_timeout;
            let input = GradingInput {
                history: session.turns.clone(),
                summary: session.summary.clone(),
                student_message: message.to_string(),
                turn: turn_index,
            };
            tokio::spawn(
                async move {
                    match tokio::time::timeout(limit, grader.evaluate(&input)).await {
                        Ok(Ok(note)) => note,
                        Ok(Err(e)) => {
                            warn!(error = ?e, "Grader failed; no note for this turn");
                            None
                        }
                        Err(_) => {
                            warn!(timeout_ms = limit.as_millis() as u64, "Grader timed out; no note for this turn");
                            None
                        }
                    }
                }
                .in_current_span(),
            )
        };

        let references = ReferenceBundle::gather(
            self.retrieval.as_ref(),
            message,
            self.settings.retrieval_top_k,
            self.settings.retrieval_timeout,
        )
        .await;
        let gates = self.policy.evaluate(message);
        let request = PersonaRequest {
            phase: session.phase,
            summary: session.summary.as_deref(),
            history: session.recent_turns(),
            student_message: message,
            references: &references,
            gates: &gates,
        };
        let mut stream = self
            .persona
            .generate(request)
            .await
            .map_err(|e| TurnAbort::Failed(SimulationError::Generation(format!("{e:#}"))))?;

        let mut reply = String::new();
        loop {
            tokio::select! {
                _ = tx.closed() => return Err(TurnAbort::Disconnected),
                next = stream.next() => match next {
                    Some(Ok(LLMStreamEvent::TextChunk(text))) => {
                        reply.push_str(&text);
                        if tx.send(TurnEvent::Token(text)).await.is_err() {
                            return Err(TurnAbort::Disconnected);
                        }
                    }
                    Some(Err(e)) => {
                        return Err(TurnAbort::Failed(SimulationError::Generation(format!("{e:#}"))));
                    }
                    None => break,
                },
            }
        }
        drop(stream);
        if reply.trim().is_empty() {
            return Err(TurnAbort::Failed(SimulationError::Generation(
                "persona produced an empty reply".into(),
            )));
        }

        let turn = Turn {
            index: turn_index,
            student: message.to_string(),
            persona: reply,
            created_at: Utc::now(),
        };
        let mut window = session.recent_turns().to_vec();
        window.push(turn.clone());

        let (phase, note, summary) = tokio::join!(
            self.router.next_phase(session.phase, message, turn_index, &window),
            async {
                match grading.await {
                    Ok(note) => note,
                    Err(e) => {
                        warn!(error = ?e, "Grader task panicked; no note for this turn");
                        None
                    }
                }
            },
            self.compact(session),
        );

        let commit = TurnCommit {
            turn,
            note,
            phase: phase.max(session.phase),
            expected_turn_count: session.turn_count,
            summary,
        };
        self.store
            .commit_turn(session.id, &commit)
            .await
            .map_err(|e| TurnAbort::Failed(SimulationError::Store(e)))?;

        Ok(CommittedTurn {
            phase: commit.phase,
            turn_count: turn_index,
            note: commit.note,
            turn: commit.turn,
        })
    }

    /// Folds older turns into the rolling summary once too many have piled up
    /// outside it. Failure just skips compaction for this turn.
    async fn compact(&self, session: &SimulationSession) -> Option<SummaryUpdate> {
        let total = session.turns.len() + 1;
        let target = plan_compaction(total, session.summarized_turns as usize)?;
        let start = (session.summarized_turns as usize).min(session.turns.len());
        let end = target.min(session.turns.len());
        if end <= start {
            return None;
        }

        let summarize = self
            .summarizer
            .summarize(session.summary.as_deref(), &session.turns[start..end]);
        match tokio::time::timeout(self.settings.summary_timeout, summarize).await {
            Ok(Ok(text)) => {
                info!(summarized_turns = end, "Conversation compacted");
                Some(SummaryUpdate {
                    text,
                    summarized_turns: end as u32,
                })
            }
            Ok(Err(e)) => {
                warn!(error = ?e, "Summarisation failed; keeping the full window");
                None
            }
            Err(_) => {
                warn!("Summarisation timed out; keeping the full window");
                None
            }
        }
    }

    fn spawn_title(&self, session_id: Uuid, turn: Turn) {
        let summarizer = Arc::clone(&self.summarizer);
        let store = Arc::clone(&self.store);
        let limit = self.settings.summary_timeout;
        tokio::spawn(
            async move {
                let title = match tokio::time::timeout(limit, summarizer.generate_title(&turn.student, &turn.persona)).await {
                    Ok(Ok(title)) => title,
                    Ok(Err(e)) => {
                        warn!(error = ?e, "Title generation failed");
                        return;
                    }
                    Err(_) => {
                        warn!("Title generation timed out");
                        return;
                    }
                };
                match store.update_title(session_id, &title).await {
                    Ok(()) => info!(%title, "Session titled"),
                    Err(e) => warn!(error = ?e, "Could not store session title"),
                }
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm_client::ScriptedLLMClient, phase::KeywordClassifier, prompts::StaticPromptRegistry,
        retrieval::NoRetrieval, store::InMemorySessionStore,
    };

    fn orchestrator() -> TurnOrchestrator {
        TurnOrchestrator::new(
            Collaborators {
                store: Arc::new(InMemorySessionStore::new()),
                llm: Arc::new(ScriptedLLMClient::new()),
                prompts: Arc::new(StaticPromptRegistry::new()),
                retrieval: Arc::new(NoRetrieval),
                classifier: Arc::new(KeywordClassifier::new()),
            },
            OrchestratorSettings::default(),
        )
    }

    #[test]
    fn test_in_flight_guard_is_exclusive_and_released_on_drop() {
        let sessions = Arc::new(InFlightSessions::default());
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let guard = sessions.try_acquire(id).unwrap();
        assert!(sessions.try_acquire(id).is_none());
        assert!(sessions.try_acquire(other).is_some());
        drop(guard);
        assert!(sessions.try_acquire(id).is_some());
    }

    #[test]
    fn test_validate_message() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.validate_message("  Hello James  ").unwrap(), "Hello James");
        assert!(matches!(
            orchestrator.validate_message("   "),
            Err(SimulationError::Validation(_))
        ));
        assert!(matches!(
            orchestrator.validate_message(&"a".repeat(4001)),
            Err(SimulationError::Validation(_))
        ));
        assert!(orchestrator.validate_message(&"é".repeat(4000)).is_ok());
    }

    #[test]
    fn test_terminal_events() {
        assert!(!TurnEvent::Token("a".into()).is_terminal());
        assert!(TurnEvent::Error("boom".into()).is_terminal());
        assert!(
            TurnEvent::Done {
                phase: Phase::Introduction,
                turn_count: 1,
                professor_note: None
            }
            .is_terminal()
        );
    }

    #[tokio::test]
    async fn test_sessions_are_scoped_to_their_owner() {
        let orchestrator = orchestrator();
        let started = orchestrator.start_session("alice").await.unwrap();
        let id = started.session.id;

        assert!(orchestrator.fetch_session("alice", id).await.is_ok());
        assert!(matches!(
            orchestrator.fetch_session("mallory", id).await,
            Err(SimulationError::UnknownSession(_))
        ));
        assert!(orchestrator.list_sessions("mallory").await.unwrap().is_empty());
        assert!(matches!(
            orchestrator.start_session(" ").await,
            Err(SimulationError::Validation(_))
        ));
    }
}
