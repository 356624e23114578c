//! Error taxonomy for the simulation core.
//!
//! Collaborator contracts (LLM backend, retrieval, storage) report failures
//! through `anyhow`; this enum is what the orchestrator surfaces to callers.

use uuid::Uuid;

/// Failures a caller of the `TurnOrchestrator` can observe.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The request was malformed (e.g. an empty message). The turn never started.
    #[error("Invalid request: {0}")]
    Validation(String),
    /// No session with this id exists for the caller.
    #[error("Session '{0}' not found")]
    UnknownSession(Uuid),
    /// A bounded upstream call (retrieval, grading, classification) stalled.
    ///
    /// The orchestrator recovers every such timeout locally (no passages, no
    /// note, classification counts as `false`) and only logs it, so it never
    /// returns this variant today. It stays for callers composing the core's
    /// collaborators themselves, and the API maps it to 502.
    #[error("Upstream call timed out: {0}")]
    UpstreamTimeout(&'static str),
    /// The persona backend failed or was cancelled mid-stream.
    #[error("Persona generation failed: {0}")]
    Generation(String),
    /// Another turn (or finalisation) is in flight for the same session.
    #[error("Session '{0}' is busy with another turn")]
    ConcurrencyConflict(Uuid),
    /// The session has already been finalised.
    #[error("Session '{0}' has already ended")]
    AlreadyEnded(Uuid),
    /// The session store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
