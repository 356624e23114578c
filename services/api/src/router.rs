//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the streaming turn endpoint and the OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        CreatedSession, CriterionView, DoneEvent, ErrorEvent, ErrorResponse, GradeReportView,
        InterviewPhase, NoteView, SessionDetail, SessionListItem, SubmitTurnPayload, TokenEvent,
        TurnView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::submit_turn,
        handlers::end_session,
    ),
    components(
        schemas(
            CreatedSession, SessionListItem, SessionDetail, TurnView, NoteView, GradeReportView,
            CriterionView, InterviewPhase, SubmitTurnPayload, TokenEvent, DoneEvent, ErrorEvent,
            ErrorResponse
        )
    ),
    tags(
        (name = "PsychTrainer API", description = "Simulated psychiatric interviews with streamed patient replies and graded debriefs")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/turns", post(handlers::submit_turn))
        .route("/sessions/{id}/end", post(handlers::end_session))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
