//! MindfulFlow server library logic.

pub mod api;
pub mod api_assist;
pub mod api_calendar;
pub mod api_clients;
pub mod api_voice;
pub mod config;
pub mod middleware;
pub mod records;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Extension, Json, Router,
};
use mindfulflow_calendar::{CalendarApi, CalendarConfig, GoogleCalendar, UnlinkedCalendar};
use mindfulflow_db::{AuthService, PracticeStore};
use mindfulflow_genai::Assistant;
use mindfulflow_voice::{LiveConnector, VoiceConfig};
use middleware::SessionTokens;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Practice records, remote or local.
    pub store: PracticeStore,
    pub auth: AuthService,
    pub assistant: Assistant,
    pub tokens: SessionTokens,
    /// Shared HTTP client for calendar calls.
    pub http: reqwest::Client,
    pub calendar: CalendarConfig,
    /// OAuth access tokens by user id.
    ///
    /// `std::sync::RwLock`: every acquisition is a short map operation that
    /// never spans an `.await`.
    pub calendar_tokens: Arc<RwLock<HashMap<String, String>>>,
    pub voice: VoiceConfig,
    /// Live endpoint used for voice sessions.
    pub live: Arc<dyn LiveConnector>,
}

impl AppState {
    /// The calendar linked by `user_id`, or an unlinked stand-in.
    pub fn calendar_for(&self, user_id: &str) -> Arc<dyn CalendarApi> {
        let token = self
            .calendar_tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned();
        match token {
            Some(token) => Arc::new(GoogleCalendar::with_client(
                self.http.clone(),
                self.calendar.clone(),
                token,
            )),
            None => Arc::new(UnlinkedCalendar),
        }
    }

    pub fn has_calendar(&self, user_id: &str) -> bool {
        self.calendar_tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }
}

/// Maximum request body size (4 MiB). Document uploads carry extracted text.
const MAX_REQUEST_BODY_BYTES: usize = 4 * 1024 * 1024;

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/me", get(api::me_handler))
        .route("/api/data", get(api_clients::get_data_handler))
        .route("/api/clients", post(api_clients::create_client_handler))
        .route(
            "/api/clients/{clientId}/notes",
            post(api_clients::save_note_handler),
        )
        .route(
            "/api/clients/{clientId}/documents",
            post(api_clients::add_document_handler),
        )
        .route(
            "/api/clients/{clientId}/recap",
            get(api_assist::recap_handler),
        )
        .route(
            "/api/clients/{clientId}/chat",
            post(api_assist::chat_handler),
        )
        .route(
            "/api/appointments",
            post(api_clients::create_appointment_handler),
        )
        .route("/api/assist/briefing", get(api_assist::briefing_handler))
        .route(
            "/api/calendar/events",
            get(api_calendar::list_events_handler),
        )
        .route(
            "/api/calendar/token",
            put(api_calendar::put_token_handler),
        )
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(api::register_handler))
        .route("/api/auth/login", post(api::login_handler))
        .route("/api/voice/ws", get(api_voice::voice_ws_handler))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
