use serde::{Deserialize, Serialize};

fn default_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_max_results() -> u32 {
    20
}

fn default_timeout_secs() -> u64 {
    15
}

/// Google Calendar endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Base URL of the Calendar v3 REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    /// Page size for upcoming-event listings.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            calendar_id: default_calendar_id(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
