//! Axum Handlers for the REST API
//!
//! Session management and the streaming turn endpoint. Every route is scoped
//! to the caller named in the `x-user-id` header, and `utoipa` annotations
//! document each one.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Json, Response,
        sse::{KeepAlive, Sse},
    },
};
use psychtrainer_core::SimulationError;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    models::{CreatedSession, ErrorResponse, GradeReportView, SessionDetail, SessionListItem, SubmitTurnPayload},
    state::AppState,
    stream::sse_stream,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadGateway(message) => {
                warn!("Upstream failure: {}", message);
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<SimulationError> for ApiError {
    fn from(err: SimulationError) -> Self {
        let message = err.to_string();
        match err {
            SimulationError::Validation(_) => ApiError::BadRequest(message),
            SimulationError::UnknownSession(_) => ApiError::NotFound(message),
            SimulationError::ConcurrencyConflict(_) | SimulationError::AlreadyEnded(_) => {
                ApiError::Conflict(message)
            }
            SimulationError::UpstreamTimeout(_) | SimulationError::Generation(_) => {
                ApiError::BadGateway(message)
            }
            SimulationError::Store(err) => ApiError::InternalServerError(err),
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Start a new interview session with the simulated patient.
#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created successfully", body = CreatedSession),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let started = state.orchestrator.start_session(user_id).await?;
    Ok((StatusCode::CREATED, Json(CreatedSession::from(started))))
}

/// List all sessions for a user, most recently active first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [SessionListItem]),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user whose sessions to list")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionListItem>>, ApiError> {
    let user_id = user_id(&headers)?;
    let sessions = state.orchestrator.list_sessions(user_id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Get a session with its turn history, notes and (once ended) its report.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionDetail),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "The ID of the session"),
        ("x-user-id" = String, Header, description = "The ID of the user who owns the session")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
    let user_id = user_id(&headers)?;
    let session = state.orchestrator.fetch_session(user_id, session_id).await?;
    Ok(Json(session.into()))
}

/// Submit a student message and stream the patient's reply.
///
/// The response is `text/event-stream`: unnamed events carry
/// `{"token": ...}` fragments, then a single `done` (`DoneEvent`) or
/// `error` (`ErrorEvent`) event closes the stream.
#[utoipa::path(
    post,
    path = "/sessions/{id}/turns",
    request_body = SubmitTurnPayload,
    responses(
        (status = 200, description = "Reply stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Empty or oversized message", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "A turn is already in progress, or the session has ended", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "The ID of the session"),
        ("x-user-id" = String, Header, description = "The ID of the user who owns the session")
    )
)]
pub async fn submit_turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitTurnPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let events = state
        .orchestrator
        .submit_turn(user_id, session_id, &payload.message)
        .await?;
    Ok(Sse::new(sse_stream(events)).keep_alive(KeepAlive::default()))
}

/// End the interview and produce the final grade report.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    responses(
        (status = 200, description = "Final grade report", body = GradeReportView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "The session has already ended or is busy", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "The ID of the session"),
        ("x-user-id" = String, Header, description = "The ID of the user who owns the session")
    )
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<Json<GradeReportView>, ApiError> {
    let user_id = user_id(&headers)?;
    let report = state.orchestrator.end_session(user_id, session_id).await?;
    Ok(Json(report.into()))
}
