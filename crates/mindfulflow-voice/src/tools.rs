//! Tool calls issued by the live model and their execution.
//!
//! Two tools are exposed: `scheduleAppointment` and `updateClientNote`.
//! Every call yields exactly one [`FunctionResponse`] carrying a
//! `{status, message}` result; failures never escape as errors.
//!
//! Writes are persist-then-apply: the [`RecordStore`] write happens first and
//! the shared [`Workspace`] is only changed once it succeeded.

use crate::error::VoiceError;
use async_trait::async_trait;
use chrono::Utc;
use mindfulflow_calendar::{parse_start, CalendarApi};
use mindfulflow_types::{
    Appointment, Note, Sentiment, SessionType, Workspace, DEFAULT_SESSION_MINUTES,
    UNKNOWN_CLIENT_ID,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub const SCHEDULE_APPOINTMENT: &str = "scheduleAppointment";
pub const UPDATE_CLIENT_NOTE: &str = "updateClientNote";

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub result: ToolResult,
}

/// The answer to one [`FunctionCall`], correlated by id and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: ResponsePayload,
}

/// Declarations sent to the model in the session setup.
pub fn function_declarations() -> Vec<Value> {
    vec![
        json!({
            "name": SCHEDULE_APPOINTMENT,
            "description": "Schedule a new appointment for a client using Google Calendar.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "clientName": { "type": "STRING", "description": "The name of the client." },
                    "dateTime": { "type": "STRING", "description": "ISO 8601 date string for the appointment." },
                    "durationMinutes": { "type": "NUMBER", "description": "Duration in minutes (default 50)." },
                    "type": { "type": "STRING", "description": "Type of appointment: \"In-Person\" or \"Virtual\"." }
                },
                "required": ["clientName", "dateTime"]
            }
        }),
        json!({
            "name": UPDATE_CLIENT_NOTE,
            "description": "Update or append to the latest note for a client. Create a new note if none exists.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "clientName": { "type": "STRING", "description": "The name of the client." },
                    "content": { "type": "STRING", "description": "The content to add to the note." },
                    "mode": { "type": "STRING", "description": "\"append\" to add to existing note, \"replace\" to overwrite." }
                },
                "required": ["clientName", "content"]
            }
        }),
    ]
}

/// Durable storage behind the tools' workspace mutations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn add_note(&self, user_id: &str, client_id: &str, note: &Note) -> Result<(), VoiceError>;

    async fn update_note_content(
        &self,
        user_id: &str,
        client_id: &str,
        note_id: &str,
        content: &str,
    ) -> Result<(), VoiceError>;

    async fn create_appointment(&self, user_id: &str, appt: &Appointment)
        -> Result<(), VoiceError>;
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolResult> {
    match args.get(key).and_then(Value::as_str) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ToolResult::error(format!("Missing required argument: {key}"))),
    }
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// `durationMinutes` may arrive as a JSON number or a numeric string.
fn duration_arg(args: &Map<String, Value>) -> u32 {
    let raw = match args.get("durationMinutes") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(m) if m.is_finite() && m >= 1.0 => m.round().min(f64::from(u32::MAX)) as u32,
        _ => DEFAULT_SESSION_MINUTES,
    }
}

/// Executes tool calls against a practitioner's workspace.
pub struct ToolDispatcher {
    workspace: Arc<Mutex<Workspace>>,
    calendar: Arc<dyn CalendarApi>,
    records: Arc<dyn RecordStore>,
}

impl ToolDispatcher {
    pub fn new(
        workspace: Arc<Mutex<Workspace>>,
        calendar: Arc<dyn CalendarApi>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            workspace,
            calendar,
            records,
        }
    }

    pub fn workspace(&self) -> Arc<Mutex<Workspace>> {
        self.workspace.clone()
    }

    // Never held across an await.
    fn ws(&self) -> MutexGuard<'_, Workspace> {
        self.workspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs calls in order and returns one response per call.
    pub async fn dispatch_all(&self, calls: &[FunctionCall]) -> Vec<FunctionResponse> {
        let mut responses = Vec::with_capacity(calls.len());
        for call in calls {
            responses.push(self.dispatch(call).await);
        }
        responses
    }

    pub async fn dispatch(&self, call: &FunctionCall) -> FunctionResponse {
        let result = match call.args.as_object() {
            Some(args) => match call.name.as_str() {
                SCHEDULE_APPOINTMENT => self.schedule_appointment(args).await,
                UPDATE_CLIENT_NOTE => self.update_client_note(args).await,
                other => ToolResult::error(format!("Unknown tool: {other}")),
            },
            None if call.args.is_null() => match call.name.as_str() {
                SCHEDULE_APPOINTMENT | UPDATE_CLIENT_NOTE => {
                    ToolResult::error("Missing required argument: clientName")
                }
                other => ToolResult::error(format!("Unknown tool: {other}")),
            },
            None => ToolResult::error("Tool arguments must be an object"),
        };

        tracing::info!(
            call_id = %call.id,
            tool = %call.name,
            status = ?result.status,
            message = %result.message,
            "tool call handled"
        );

        FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response: ResponsePayload { result },
        }
    }

    async fn schedule_appointment(&self, args: &Map<String, Value>) -> ToolResult {
        let client_name = match required_str(args, "clientName") {
            Ok(v) => v,
            Err(r) => return r,
        };
        let date_time = match required_str(args, "dateTime") {
            Ok(v) => v,
            Err(r) => return r,
        };
        let duration = duration_arg(args);
        let session_type = optional_str(args, "type")
            .and_then(|t| t.parse::<SessionType>().ok())
            .unwrap_or_default();

        let start = match parse_start(date_time) {
            Ok(t) => t,
            Err(e) => return ToolResult::error(format!("Failed to schedule on Google Calendar: {e}")),
        };

        let (user_id, client_id, display_name) = {
            let ws = self.ws();
            let resolved = ws.find_client(client_name);
            (
                ws.user_id.clone(),
                resolved.map_or_else(|| UNKNOWN_CLIENT_ID.to_string(), |c| c.id.clone()),
                resolved.map_or_else(|| client_name.to_string(), |c| c.name.clone()),
            )
        };

        if let Err(e) = self
            .calendar
            .create_event(&format!("Session with {display_name}"), start, duration)
            .await
        {
            tracing::warn!(error = %e, "calendar event creation failed");
            return ToolResult::error(format!("Failed to schedule on Google Calendar: {e}"));
        }

        let refreshed = match self.calendar.list_upcoming().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "calendar refresh failed after scheduling");
                Vec::new()
            }
        };

        if refreshed.is_empty() {
            let appt = Appointment {
                id: format!("a_{}", Uuid::new_v4().simple()),
                client_id,
                date: start.to_rfc3339(),
                duration_minutes: duration,
                session_type,
                summary: None,
            };
            if let Err(e) = self.records.create_appointment(&user_id, &appt).await {
                tracing::error!(error = %e, "failed to persist optimistic appointment");
                return ToolResult::error(format!(
                    "Scheduled on Google Calendar but could not save the appointment: {e}"
                ));
            }
            self.ws().push_appointment(appt);
        } else {
            self.ws().replace_appointments(refreshed);
        }

        ToolResult::success(format!(
            "Scheduled on Google Calendar: {session_type} appointment with {client_name} for {date_time}"
        ))
    }

    async fn update_client_note(&self, args: &Map<String, Value>) -> ToolResult {
        let client_name = match required_str(args, "clientName") {
            Ok(v) => v,
            Err(r) => return r,
        };
        let content = match required_str(args, "content") {
            Ok(v) => v,
            Err(r) => return r,
        };
        let replace = optional_str(args, "mode") == Some("replace");

        let (user_id, client_id, display_name, latest) = {
            let ws = self.ws();
            let Some(client) = ws.find_client(client_name) else {
                return ToolResult::error(format!("Client {client_name} not found"));
            };
            (
                ws.user_id.clone(),
                client.id.clone(),
                client.name.clone(),
                client.notes.first().cloned(),
            )
        };

        match latest {
            Some(note) if !replace => {
                let combined = format!("{}\n{content}", note.content);
                if let Err(e) = self
                    .records
                    .update_note_content(&user_id, &client_id, &note.id, &combined)
                    .await
                {
                    return ToolResult::error(format!("Could not save note for {display_name}: {e}"));
                }
                self.ws().set_note_content(&client_id, &note.id, &combined);
            }
            _ => {
                let note = Note {
                    id: format!("n_{}", Uuid::new_v4().simple()),
                    date: Utc::now().to_rfc3339(),
                    content: content.to_string(),
                    summary: None,
                    sentiment: Some(Sentiment::Neutral),
                };
                if let Err(e) = self.records.add_note(&user_id, &client_id, &note).await {
                    return ToolResult::error(format!("Could not save note for {display_name}: {e}"));
                }
                self.ws().prepend_note(&client_id, note);
            }
        }

        ToolResult::success(format!("Updated notes for {display_name}"))
    }
}
