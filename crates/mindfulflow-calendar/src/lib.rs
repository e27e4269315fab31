//! Calendar bridge for MindfulFlow.
//!
//! Lists upcoming events and creates session events on the practitioner's
//! Google Calendar. Events are surfaced as [`Appointment`]s so the rest of
//! the system never sees the provider's wire format.

mod config;
mod error;
mod event;
mod google;

pub use config::CalendarConfig;
pub use error::CalendarError;
pub use event::{event_to_appointment, parse_start, CalendarEvent, EventTime};
pub use google::GoogleCalendar;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindfulflow_types::Appointment;

/// Description attached to every event created by the assistant.
pub const EVENT_DESCRIPTION: &str = "Scheduled via MindfulFlow AI";

/// A calendar the assistant can read from and write to.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Upcoming events from now on, ordered by start time.
    async fn list_upcoming(&self) -> Result<Vec<Appointment>, CalendarError>;

    /// Creates an event starting at `start` lasting `duration_minutes`.
    async fn create_event(
        &self,
        summary: &str,
        start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<CalendarEvent, CalendarError>;
}

/// Stand-in used when the practitioner has not linked a calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlinkedCalendar;

#[async_trait]
impl CalendarApi for UnlinkedCalendar {
    async fn list_upcoming(&self) -> Result<Vec<Appointment>, CalendarError> {
        Err(CalendarError::NotAuthorized)
    }

    async fn create_event(
        &self,
        _summary: &str,
        _start: DateTime<Utc>,
        _duration_minutes: u32,
    ) -> Result<CalendarEvent, CalendarError> {
        Err(CalendarError::NotAuthorized)
    }
}
