//! Shared types for the MindfulFlow practice organizer.
//!
//! This crate provides the data model used across all MindfulFlow crates:
//! users, clients, session notes, documents and appointments, together with
//! the in-memory [`Workspace`] the voice assistant mutates.
//!
//! Records serialize with camelCase field names and display-string enum
//! labels (`"In-Person"`, `"Concern"`) so the same JSON shape is used by the
//! HTTP API, the local snapshot store and the tool-call layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod workspace;
pub use workspace::Workspace;

/// Client id used when a record cannot be linked to a known client.
pub const UNKNOWN_CLIENT_ID: &str = "unknown";

/// Default session length used when none is given.
pub const DEFAULT_SESSION_MINUTES: u32 = 50;

/// Error returned when parsing a stored enum label fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    kind: &'static str,
    label: String,
}

/// Whether a client is currently seen by the practitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientStatus {
    #[default]
    Active,
    Archived,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Archived => "Archived",
        }
    }
}

impl FromStr for ClientStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Archived" => Ok(Self::Archived),
            other => Err(ParseLabelError {
                kind: "client status",
                label: other.to_string(),
            }),
        }
    }
}

/// Sentiment tag attached to a session note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Concern,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "Positive",
            Self::Neutral => "Neutral",
            Self::Concern => "Concern",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Positive" => Ok(Self::Positive),
            "Neutral" => Ok(Self::Neutral),
            "Concern" => Ok(Self::Concern),
            other => Err(ParseLabelError {
                kind: "sentiment",
                label: other.to_string(),
            }),
        }
    }
}

/// How an appointment takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionType {
    #[default]
    #[serde(rename = "In-Person")]
    InPerson,
    Virtual,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InPerson => "In-Person",
            Self::Virtual => "Virtual",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = ParseLabelError;

    /// Accepts the display label as well as the looser spellings a
    /// language model tends to produce (`"in person"`, `"virtual"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '_'], "-").as_str() {
            "in-person" | "inperson" => Ok(Self::InPerson),
            "virtual" | "online" | "video" => Ok(Self::Virtual),
            _ => Err(ParseLabelError {
                kind: "session type",
                label: s.to_string(),
            }),
        }
    }
}

/// A practitioner account. The password hash is stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A session note. `date` is an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub date: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

/// A file attached to a client's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub id: String,
    pub name: String,
    /// MIME type of the uploaded file.
    #[serde(rename = "type")]
    pub mime_type: String,
    pub upload_date: String,
    /// Extracted text content, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A client of the practice with their notes (newest first) and documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub status: ClientStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_appointment: Option<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub documents: Vec<DocumentFile>,
}

/// A scheduled session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub client_id: String,
    pub date: String,
    pub duration_minutes: u32,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Event title, carried over when the appointment comes from a calendar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Everything a practitioner owns: the unit of fetch and of local snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub clients: Vec<Client>,
    pub appointments: Vec<Appointment>,
}

impl UserData {
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.appointments.is_empty()
    }
}

/// Structured result of analysing a session note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteAnalysis {
    pub summary: String,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl NoteAnalysis {
    /// The neutral result used when no analysis could be produced.
    pub fn neutral(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            sentiment: Sentiment::Neutral,
            suggestions: Vec::new(),
        }
    }
}
