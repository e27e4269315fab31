//! Co-pilot handlers backed by the text-generation adapter.

use crate::api::{blocking, ApiError};
use crate::middleware::AuthUser;
use crate::AppState;
use axum::extract::{Extension, Json, Path};
use chrono::Utc;
use mindfulflow_genai::{note_context, ChatTurn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NEW_CLIENT_GREETING: &str = "New client file opened. Ready for initial intake notes.";
const READY_TO_LOG: &str = "Ready to log today's session.";

/// A generated text plus an optional follow-up line for the UI.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

/// Handler for `GET /api/assist/briefing`.
pub async fn briefing_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<AssistText>, ApiError> {
    let store = state.store.clone();
    let data = blocking(move || Ok::<_, ApiError>(store.fetch_user_data(&user_id))).await?;

    let text = state
        .assistant
        .daily_briefing(&data.appointments, &data.clients, Utc::now().date_naive())
        .await;
    Ok(Json(AssistText {
        text,
        follow_up: None,
    }))
}

/// Handler for `GET /api/clients/{clientId}/recap`.
///
/// Clients without notes get the intake greeting instead of a recap.
pub async fn recap_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(client_id): Path<String>,
) -> Result<Json<AssistText>, ApiError> {
    let store = state.store.clone();
    let client = blocking(move || store.find_client(&user_id, &client_id)).await?;

    let Some(last_note) = client.notes.first() else {
        return Ok(Json(AssistText {
            text: NEW_CLIENT_GREETING.to_string(),
            follow_up: None,
        }));
    };

    let text = state.assistant.session_recap(last_note, &client.name).await;
    Ok(Json(AssistText {
        text,
        follow_up: Some(READY_TO_LOG.to_string()),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    /// Document the practitioner has open, if any.
    #[serde(default)]
    pub document_id: Option<String>,
}

/// Handler for `POST /api/clients/{clientId}/chat`.
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(client_id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<AssistText>, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query is required".to_string()));
    }

    let store = state.store.clone();
    let client = blocking(move || store.find_client(&user_id, &client_id)).await?;

    let document = match payload.document_id.as_deref() {
        Some(doc_id) => Some(
            client
                .documents
                .iter()
                .find(|d| d.id == doc_id)
                .ok_or_else(|| ApiError::NotFound(format!("document {doc_id}")))?,
        ),
        None => None,
    };

    let context = note_context(&client, document);
    let text = state.assistant.chat(&payload.history, &context, query).await;
    Ok(Json(AssistText {
        text,
        follow_up: None,
    }))
}
