use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("live endpoint credentials are missing")]
    MissingCredentials,

    #[error("microphone unavailable: {0}")]
    Microphone(String),

    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("live endpoint handshake failed: {0}")]
    Handshake(String),

    #[error("live endpoint transport error: {0}")]
    Transport(String),

    #[error("unexpected live endpoint message: {0}")]
    Protocol(String),

    #[error("record store error: {0}")]
    Store(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(e.to_string())
    }
}
