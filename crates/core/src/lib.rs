//! Core of the clinical interview simulator: the phase state machine, the
//! gated patient persona, the silent grader, the grade aggregator and the
//! turn orchestrator that drives them. HTTP and SQL live in the API service.

pub mod error;
pub mod grader;
pub mod grading;
pub mod llm_client;
pub mod orchestrator;
pub mod persona;
pub mod phase;
pub mod prompts;
pub mod retrieval;
pub mod risk;
pub mod session;
pub mod store;
pub mod summarizer;

pub use error::SimulationError;
pub use orchestrator::{Collaborators, OrchestratorSettings, StartedSession, TurnEvent, TurnOrchestrator};
