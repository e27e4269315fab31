//! Calendar v3 event wire types and their mapping onto appointments.

use crate::error::CalendarError;
use chrono::{DateTime, NaiveDateTime, Utc};
use mindfulflow_types::{Appointment, SessionType, DEFAULT_SESSION_MINUTES, UNKNOWN_CLIENT_ID};
use serde::{Deserialize, Serialize};

/// Start or end of an event: a timestamp for timed events, a date for
/// all-day events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            date_time: Some(at.to_rfc3339()),
            date: None,
            time_zone: Some("UTC".to_string()),
        }
    }

    fn raw(&self) -> Option<&str> {
        self.date_time.as_deref().or(self.date.as_deref())
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub start: EventTime,
    #[serde(default)]
    pub end: EventTime,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventList {
    #[serde(default)]
    pub items: Vec<CalendarEvent>,
}

fn is_virtual(location: Option<&str>) -> bool {
    location
        .map(str::to_lowercase)
        .is_some_and(|l| l.contains("zoom") || l.contains("meet"))
}

/// Maps a calendar event to an appointment.
///
/// Events carry no client reference, so the client id is the placeholder.
/// Events without any start time are skipped.
pub fn event_to_appointment(event: CalendarEvent) -> Option<Appointment> {
    let date = event.start.raw()?.to_string();

    let duration_minutes = match (event.start.timestamp(), event.end.timestamp()) {
        (Some(start), Some(end)) if end > start => {
            u32::try_from((end - start).num_minutes()).unwrap_or(DEFAULT_SESSION_MINUTES)
        }
        _ => DEFAULT_SESSION_MINUTES,
    };

    let session_type = if is_virtual(event.location.as_deref()) {
        SessionType::Virtual
    } else {
        SessionType::InPerson
    };

    Some(Appointment {
        id: event.id,
        client_id: UNKNOWN_CLIENT_ID.to_string(),
        date,
        duration_minutes,
        session_type,
        summary: event.summary,
    })
}

/// Parses a start time as given by a user or the voice model.
///
/// Accepts RFC 3339 and offset-less `YYYY-MM-DDTHH:MM[:SS]` (read as UTC).
pub fn parse_start(raw: &str) -> Result<DateTime<Utc>, CalendarError> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CalendarError::InvalidDate(raw.to_string()))
}
