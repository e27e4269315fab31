use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mindfulflow_calendar::CalendarConfig;
use mindfulflow_db::{AuthService, DbRuntimeSettings, LocalStore, PracticeStore};
use mindfulflow_genai::Assistant;
use mindfulflow_server::middleware::SessionTokens;
use mindfulflow_server::{app, AppState};
use mindfulflow_voice::{GeminiLiveConnector, VoiceConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tower::ServiceExt;

fn state(dir: &Path, remote: bool) -> AppState {
    let local = LocalStore::open(dir.join("local")).unwrap();
    let pool = remote.then(|| {
        let path = dir.join("mindfulflow.db");
        mindfulflow_db::create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap()
    });
    if let Some(pool) = &pool {
        mindfulflow_db::run_migrations(&pool.get().unwrap()).unwrap();
    }
    let store = match &pool {
        Some(pool) => PracticeStore::Remote(pool.clone()),
        None => PracticeStore::Local(local.clone()),
    };
    let voice = VoiceConfig::default();
    AppState {
        store,
        auth: AuthService::new(pool, local),
        assistant: Assistant::unconfigured(),
        tokens: SessionTokens::new("test-secret", 3600),
        http: reqwest::Client::new(),
        calendar: CalendarConfig::default(),
        calendar_tokens: Arc::new(RwLock::new(HashMap::new())),
        live: Arc::new(GeminiLiveConnector::new(&voice)),
        voice,
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn register(app: &Router, email: &str) -> (String, String) {
    let (status, body) = call(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "name": "Dr. Reyes", "email": email, "password": "pw-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_check_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), false));

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_login_and_me() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));

    let (token, user_id) = register(&app, "Reyes@Example.com").await;

    let (status, me) = call(&app, "GET", "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id.as_str());
    assert_eq!(me["email"], "reyes@example.com");

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "reyes@example.com", "password": "pw-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], user_id.as_str());

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "reyes@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));

    register(&app, "dup@example.com").await;
    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "name": "Other", "email": "dup@example.com", "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_register_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "name": " ", "email": "a@b.c", "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));

    let (status, _) = call(&app, "GET", "/api/data", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/data", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn first_fetch_seeds_onboarding_data() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));
    let (token, _) = register(&app, "seed@example.com").await;

    let (status, data) = call(&app, "GET", "/api/data", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let clients = data["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 3);
    assert!(clients.iter().any(|c| c["name"] == "Sarah Jenkins"));

    // A second fetch returns the same records rather than seeding again.
    let (_, again) = call(&app, "GET", "/api/data", Some(&token), None).await;
    assert_eq!(again["clients"].as_array().unwrap().len(), 3);
    assert_eq!(again["clients"][0]["id"], clients[0]["id"]);
}

#[tokio::test]
async fn client_note_and_document_flow() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));
    let (token, _) = register(&app, "flow@example.com").await;

    let (status, client) = call(
        &app,
        "POST",
        "/api/clients",
        Some(&token),
        Some(json!({ "name": "Jordan Blake", "status": "Archived" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let client_id = client["id"].as_str().unwrap().to_string();
    assert!(client["avatar"].as_str().unwrap().contains(&client_id));

    let (status, saved) = call(
        &app,
        "POST",
        &format!("/api/clients/{client_id}/notes"),
        Some(&token),
        Some(json!({ "content": "Intake completed. Reports low mood." })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saved["note"]["sentiment"], "Neutral");
    assert_eq!(saved["message"], "Entry saved. Sentiment detected: Neutral.");

    let (status, doc) = call(
        &app,
        "POST",
        &format!("/api/clients/{client_id}/documents"),
        Some(&token),
        Some(json!({ "name": "Consent.pdf", "type": "application/pdf", "content": "Signed." })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(doc["type"], "application/pdf");

    let (_, data) = call(&app, "GET", "/api/data", Some(&token), None).await;
    let stored = data["clients"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["id"] == client_id.as_str())
        .cloned()
        .unwrap();
    assert_eq!(stored["notes"].as_array().unwrap().len(), 1);
    assert_eq!(stored["documents"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn blank_note_and_unknown_client_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));
    let (token, _) = register(&app, "reject@example.com").await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/clients/c_missing/notes",
        Some(&token),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/api/clients/c_missing/notes",
        Some(&token),
        Some(json!({ "content": "Something" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn recap_of_a_new_client_is_the_intake_greeting() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));
    let (token, _) = register(&app, "recap@example.com").await;

    let (_, client) = call(
        &app,
        "POST",
        "/api/clients",
        Some(&token),
        Some(json!({ "name": "Sam Ortiz" })),
    )
    .await;
    let client_id = client["id"].as_str().unwrap();

    let (status, recap) = call(
        &app,
        "GET",
        &format!("/api/clients/{client_id}/recap"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        recap["text"],
        "New client file opened. Ready for initial intake notes."
    );
    assert!(recap.get("followUp").is_none());
}

#[tokio::test]
async fn appointments_are_created_with_default_duration() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));
    let (token, _) = register(&app, "appt@example.com").await;

    let (_, data) = call(&app, "GET", "/api/data", Some(&token), None).await;
    let client_id = data["clients"][0]["id"].as_str().unwrap().to_string();
    let before = data["appointments"].as_array().unwrap().len();

    let (status, appt) = call(
        &app,
        "POST",
        "/api/appointments",
        Some(&token),
        Some(json!({ "clientId": client_id, "date": "2030-03-04T15:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(appt["durationMinutes"], 50);

    let (status, _) = call(
        &app,
        "POST",
        "/api/appointments",
        Some(&token),
        Some(json!({ "clientId": client_id, "date": "next tuesday-ish" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, data) = call(&app, "GET", "/api/data", Some(&token), None).await;
    assert_eq!(data["appointments"].as_array().unwrap().len(), before + 1);
}

#[tokio::test]
async fn calendar_link_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), true));
    let (token, _) = register(&app, "cal@example.com").await;

    let (status, events) = call(&app, "GET", "/api/calendar/events", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events, json!([]));

    let (status, body) = call(
        &app,
        "PUT",
        "/api/calendar/token",
        Some(&token),
        Some(json!({ "accessToken": "ya29.token" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["linked"], true);

    let (_, body) = call(
        &app,
        "PUT",
        "/api/calendar/token",
        Some(&token),
        Some(json!({ "accessToken": "" })),
    )
    .await;
    assert_eq!(body["linked"], false);
}

#[tokio::test]
async fn unreachable_calendar_lists_no_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = state(dir.path(), true);
    state.calendar.api_base = "http://127.0.0.1:9".to_string();
    let app = app(state);
    let (token, _) = register(&app, "down@example.com").await;

    let (_, body) = call(
        &app,
        "PUT",
        "/api/calendar/token",
        Some(&token),
        Some(json!({ "accessToken": "ya29.token" })),
    )
    .await;
    assert_eq!(body["linked"], true);

    let (status, events) = call(&app, "GET", "/api/calendar/events", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events, json!([]));
}

#[tokio::test]
async fn local_only_mode_serves_accounts_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(state(dir.path(), false));
    let (token, _) = register(&app, "offline@example.com").await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "offline@example.com", "password": "pw-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, data) = call(&app, "GET", "/api/data", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let client_id = data["clients"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/clients/{client_id}/notes"),
        Some(&token),
        Some(json!({ "content": "Offline session note." })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}
