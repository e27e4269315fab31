//! Google Calendar v3 client.
//!
//! Lists upcoming events on the primary calendar and creates session events,
//! authenticating with a per-user OAuth bearer token.

use crate::config::CalendarConfig;
use crate::error::CalendarError;
use crate::event::{event_to_appointment, CalendarEvent, EventList, EventTime};
use crate::{CalendarApi, EVENT_DESCRIPTION};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mindfulflow_types::Appointment;
use std::fmt;

/// Google Calendar v3 client acting with one user's OAuth access token.
#[derive(Clone)]
pub struct GoogleCalendar {
    http: reqwest::Client,
    config: CalendarConfig,
    access_token: String,
}

impl fmt::Debug for GoogleCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleCalendar")
            .field("config", &self.config)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl GoogleCalendar {
    /// Builds a client with its own HTTP connection pool.
    pub fn new(
        config: CalendarConfig,
        access_token: impl Into<String>,
    ) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(http, config, access_token))
    }

    /// Builds a client on a shared `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        config: CalendarConfig,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            config,
            access_token: access_token.into(),
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.config.api_base.trim_end_matches('/'),
            self.config.calendar_id
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CalendarError::NotAuthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendar {
    async fn list_upcoming(&self) -> Result<Vec<Appointment>, CalendarError> {
        let time_min = Utc::now().to_rfc3339();
        let max_results = self.config.max_results.to_string();
        let response = self
            .http
            .get(self.events_url())
            .bearer_auth(&self.access_token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("showDeleted", "false"),
                ("singleEvents", "true"),
                ("maxResults", max_results.as_str()),
                ("orderBy", "startTime"),
            ])
            .send()
            .await?;

        let list: EventList = Self::check(response).await?.json().await?;
        let appointments: Vec<_> = list
            .items
            .into_iter()
            .filter_map(event_to_appointment)
            .collect();
        tracing::debug!(count = appointments.len(), "listed upcoming calendar events");
        Ok(appointments)
    }

    async fn create_event(
        &self,
        summary: &str,
        start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<CalendarEvent, CalendarError> {
        let end = start + Duration::minutes(i64::from(duration_minutes));
        let event = CalendarEvent {
            summary: Some(summary.to_string()),
            description: Some(EVENT_DESCRIPTION.to_string()),
            start: EventTime::at(start),
            end: EventTime::at(end),
            ..CalendarEvent::default()
        };

        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(&self.access_token)
            .json(&event)
            .send()
            .await?;

        let created: CalendarEvent = Self::check(response).await?.json().await?;
        tracing::info!(event_id = %created.id, %start, duration_minutes, "calendar event created");
        Ok(created)
    }
}
