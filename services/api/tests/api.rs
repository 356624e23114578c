//! End-to-end tests of the HTTP surface against an in-memory store and the
//! scripted generation backend.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use psychtrainer_api::{router::create_router, state::AppState};
use psychtrainer_core::{
    Collaborators, OrchestratorSettings, TurnOrchestrator,
    llm_client::ScriptedLLMClient,
    phase::KeywordClassifier,
    prompts::StaticPromptRegistry,
    retrieval::NoRetrieval,
    store::InMemorySessionStore,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const USER: &str = "student-1";

fn app() -> Router {
    let orchestrator = TurnOrchestrator::new(
        Collaborators {
            store: Arc::new(InMemorySessionStore::new()),
            llm: Arc::new(ScriptedLLMClient::new()),
            prompts: Arc::new(StaticPromptRegistry::new()),
            retrieval: Arc::new(NoRetrieval),
            classifier: Arc::new(KeywordClassifier::new()),
        },
        OrchestratorSettings::default(),
    );
    create_router(Arc::new(AppState::new(orchestrator)))
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap_or(Value::Null))
}

async fn create_session(app: &Router) -> String {
    let (status, body) = send_json(app, request("POST", "/sessions", Some(USER), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

/// Parses an SSE body into `(event name, data)` pairs. Unnamed events get "message".
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut name = "message".to_string();
            let mut data = None;
            for line in frame.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = value.trim().to_string();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
                }
            }
            data.map(|data| (name, serde_json::from_str(&data).unwrap()))
        })
        .collect()
}

async fn submit(app: &Router, id: &str, message: &str) -> Vec<(String, Value)> {
    let (status, body) = send(
        app,
        request(
            "POST",
            &format!("/sessions/{id}/turns"),
            Some(USER),
            Some(json!({ "message": message })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    parse_sse(&body)
}

#[tokio::test]
async fn test_create_session_returns_opening_state() {
    let app = app();
    let (status, body) = send_json(&app, request("POST", "/sessions", Some(USER), None)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["phase"], "introduction");
    assert_eq!(body["turn_count"], 0);
    assert_eq!(body["title"], "New Conversation");
    assert!(body["opening_message"].as_str().unwrap().contains("James"));
}

#[tokio::test]
async fn test_user_header_is_required() {
    let app = app();
    let (status, body) = send_json(&app, request("POST", "/sessions", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "x-user-id header is required");

    let (status, _) = send_json(&app, request("GET", "/sessions", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_turn_streams_tokens_then_done() {
    let app = app();
    let id = create_session(&app).await;

    let events = submit(&app, &id, "How many times a day do you wash your hands?").await;
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!(last_name, "done");
    assert_eq!(last_data["turn_count"], 1);
    assert_eq!(last_data["phase"], "examination");
    assert_eq!(events.iter().filter(|(name, _)| name != "message").count(), 1);

    let reply: String = events
        .iter()
        .filter(|(name, _)| name == "message")
        .map(|(_, data)| data["token"].as_str().unwrap())
        .collect();
    assert_eq!(
        reply,
        "I... um, I've been washing my hands a lot lately. It's kind of taking over my day."
    );

    let (status, session) = send_json(&app, request("GET", &format!("/sessions/{id}"), Some(USER), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["turn_count"], 1);
    assert_eq!(session["phase"], "examination");
    assert_eq!(session["turns"][0]["persona"], reply);
    assert_eq!(session["report"], Value::Null);
}

#[tokio::test]
async fn test_invalid_turns_are_rejected_before_streaming() {
    let app = app();
    let id = create_session(&app).await;

    let (status, _) = send_json(
        &app,
        request("POST", &format!("/sessions/{id}/turns"), Some(USER), Some(json!({ "message": "   " }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &app,
        request("POST", &format!("/sessions/{id}/turns"), Some("someone-else"), Some(json!({ "message": "Hi" }))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(&app, request("GET", "/sessions/not-a-uuid", Some(USER), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sessions_are_scoped_to_their_owner() {
    let app = app();
    let id = create_session(&app).await;

    let (status, _) = send_json(&app, request("GET", &format!("/sessions/{id}"), Some("intruder"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, mine) = send_json(&app, request("GET", "/sessions", Some(USER), None)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["id"], id.as_str());

    let (_, theirs) = send_json(&app, request("GET", "/sessions", Some("intruder"), None)).await;
    assert!(theirs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_end_session_grades_once() {
    let app = app();
    let id = create_session(&app).await;
    submit(&app, &id, "Have you had any thoughts of ending your life?").await;

    let (status, report) = send_json(&app, request("POST", &format!("/sessions/{id}/end"), Some(USER), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["criteria"].as_array().unwrap().len(), 7);
    assert!(["A", "B", "C", "D", "F"].contains(&report["letter_grade"].as_str().unwrap()));
    let overall = report["overall_score"].as_u64().unwrap();
    assert!(overall <= 100);

    let (status, _) = send_json(&app, request("POST", &format!("/sessions/{id}/end"), Some(USER), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, session) = send_json(&app, request("GET", &format!("/sessions/{id}"), Some(USER), None)).await;
    assert_eq!(session["ended"], true);
    assert_eq!(session["report"]["overall_score"], overall);

    let (status, _) = send_json(
        &app,
        request("POST", &format!("/sessions/{id}/turns"), Some(USER), Some(json!({ "message": "One more thing?" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = app();
    let (status, doc) = send_json(&app, request("GET", "/api-docs/openapi.json", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    for path in ["/sessions", "/sessions/{id}", "/sessions/{id}/turns", "/sessions/{id}/end"] {
        assert!(doc["paths"].get(path).is_some(), "missing {path}");
    }
}
