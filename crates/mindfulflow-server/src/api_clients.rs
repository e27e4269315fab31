//! Practice record handlers: data snapshot, clients, notes, documents and
//! appointments.

use crate::api::{blocking, ApiError};
use crate::middleware::AuthUser;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
};
use chrono::Utc;
use mindfulflow_types::{
    Appointment, Client, ClientStatus, DocumentFile, Note, SessionType, UserData,
    DEFAULT_SESSION_MINUTES,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Handler for `GET /api/data`.
pub async fn get_data_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<UserData>, ApiError> {
    let store = state.store.clone();
    let data = blocking(move || Ok::<_, ApiError>(store.fetch_user_data(&user_id))).await?;
    Ok(Json(data))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: ClientStatus,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub next_appointment: Option<String>,
}

/// Handler for `POST /api/clients`.
pub async fn create_client_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(payload): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<Client>), ApiError> {
    let name = required(&payload.name, "name")?;
    let id = new_id("c");
    let client = Client {
        avatar: payload
            .avatar
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| format!("https://picsum.photos/seed/{id}/200/200")),
        id,
        name,
        status: payload.status,
        diagnosis: payload.diagnosis.filter(|d| !d.trim().is_empty()),
        next_appointment: payload.next_appointment,
        notes: Vec::new(),
        documents: Vec::new(),
    };

    let store = state.store.clone();
    let stored = client.clone();
    blocking(move || store.create_client(&user_id, &stored)).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

#[derive(Debug, Deserialize)]
pub struct SaveNoteRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveNoteResponse {
    pub note: Note,
    pub message: String,
}

/// Handler for `POST /api/clients/{clientId}/notes`.
///
/// Analyses the note before storing it with its summary and sentiment.
pub async fn save_note_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(client_id): Path<String>,
    Json(payload): Json<SaveNoteRequest>,
) -> Result<(StatusCode, Json<SaveNoteResponse>), ApiError> {
    if payload.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content is required".to_string()));
    }

    let store = state.store.clone();
    let (uid, cid) = (user_id.clone(), client_id.clone());
    blocking(move || store.find_client(&uid, &cid)).await?;

    let analysis = state.assistant.analyze_note(&payload.content).await;
    let note = Note {
        id: new_id("n"),
        date: Utc::now().to_rfc3339(),
        content: payload.content,
        summary: Some(analysis.summary),
        sentiment: Some(analysis.sentiment),
    };

    let store = state.store.clone();
    let stored = note.clone();
    blocking(move || store.add_note(&user_id, &client_id, &stored)).await?;

    let message = format!("Entry saved. Sentiment detected: {}.", analysis.sentiment);
    Ok((StatusCode::CREATED, Json(SaveNoteResponse { note, message })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentRequest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Handler for `POST /api/clients/{clientId}/documents`.
pub async fn add_document_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(client_id): Path<String>,
    Json(payload): Json<AddDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentFile>), ApiError> {
    let name = required(&payload.name, "name")?;
    let doc = DocumentFile {
        id: new_id("d"),
        name,
        mime_type: if payload.mime_type.trim().is_empty() {
            "application/octet-stream".to_string()
        } else {
            payload.mime_type
        },
        upload_date: Utc::now().date_naive().to_string(),
        content: payload.content,
    };

    let store = state.store.clone();
    let (uid, cid) = (user_id.clone(), client_id.clone());
    blocking(move || store.find_client(&uid, &cid)).await?;

    let store = state.store.clone();
    let stored = doc.clone();
    blocking(move || store.add_document(&user_id, &client_id, &stored)).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub client_id: String,
    pub date: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(rename = "type", default)]
    pub session_type: SessionType,
}

/// Handler for `POST /api/appointments`.
pub async fn create_appointment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(payload): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let client_id = required(&payload.client_id, "clientId")?;
    let start = mindfulflow_calendar::parse_start(&payload.date)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let appt = Appointment {
        id: new_id("a"),
        client_id,
        date: start.to_rfc3339(),
        duration_minutes: payload
            .duration_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_SESSION_MINUTES),
        session_type: payload.session_type,
        summary: None,
    };

    let store = state.store.clone();
    let stored = appt.clone();
    blocking(move || store.create_appointment(&user_id, &stored)).await?;
    Ok((StatusCode::CREATED, Json(appt)))
}
