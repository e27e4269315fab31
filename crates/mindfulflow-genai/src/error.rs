use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenAiError {
    #[error("generation request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("generation API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned no text")]
    EmptyResponse,

    #[error("model output is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}
