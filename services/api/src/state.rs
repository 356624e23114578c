//! Shared Application State
//!
//! Holds the turn orchestrator, which owns every collaborator the handlers
//! need (store, LLM backend, prompts, retrieval).

use psychtrainer_core::TurnOrchestrator;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: TurnOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}
