use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar is not linked")]
    NotAuthorized,

    #[error("calendar request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("calendar API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid date/time: {0}")]
    InvalidDate(String),
}
