//! Calendar link and upcoming-event handlers.

use crate::middleware::AuthUser;
use crate::AppState;
use axum::extract::{Extension, Json};
use mindfulflow_types::Appointment;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};

/// Handler for `GET /api/calendar/events`.
///
/// An unlinked calendar lists nothing, and so does a calendar that cannot be
/// reached or rejects the token.
pub async fn list_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Json<Vec<Appointment>> {
    if !state.has_calendar(&user_id) {
        return Json(Vec::new());
    }
    match state.calendar_for(&user_id).list_upcoming().await {
        Ok(events) => {
            tracing::debug!(user_id, count = events.len(), "listed upcoming calendar events");
            Json(events)
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "calendar list failed, returning no events");
            Json(Vec::new())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarTokenRequest {
    /// OAuth access token; empty unlinks the calendar.
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalendarLinkResponse {
    pub linked: bool,
}

/// Handler for `PUT /api/calendar/token`.
pub async fn put_token_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(payload): Json<CalendarTokenRequest>,
) -> Json<CalendarLinkResponse> {
    let token = payload.access_token.trim().to_string();
    let linked = !token.is_empty();
    {
        let mut tokens = state
            .calendar_tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if linked {
            tokens.insert(user_id.clone(), token);
        } else {
            tokens.remove(&user_id);
        }
    }
    tracing::info!(user_id, linked, "calendar link updated");
    Json(CalendarLinkResponse { linked })
}
