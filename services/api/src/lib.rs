//! PsychTrainer API Library Crate
//!
//! The HTTP face of the interview simulator: configuration, the Postgres
//! store, request handlers, SSE framing and routing. The `api` binary is a
//! thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod stream;
