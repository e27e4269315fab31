//! Live endpoint transport.
//!
//! A [`LiveConnector`] performs the session handshake and hands back a
//! [`LiveLink`]: a sink for microphone audio and tool responses and a stream
//! of server events. [`GeminiLiveConnector`] speaks the Gemini Live
//! `BidiGenerateContent` WebSocket protocol.

use crate::config::VoiceConfig;
use crate::error::VoiceError;
use crate::tools::{function_declarations, FunctionCall, FunctionResponse};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio_tungstenite::tungstenite::{self, Message};

/// What the session sends to the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// One capture frame as 16-bit little-endian PCM.
    Audio(Vec<u8>),
    /// All responses for one server tool-call turn.
    ToolResponses(Vec<FunctionResponse>),
}

/// What the endpoint sends to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A chunk of model speech as 16-bit little-endian PCM.
    Audio(Vec<u8>),
    ToolCalls(Vec<FunctionCall>),
    TurnComplete,
    Interrupted,
}

/// Session parameters sent in the handshake.
#[derive(Debug, Clone)]
pub struct LiveSetup {
    pub model: String,
    pub system_instruction: String,
    pub function_declarations: Vec<Value>,
    pub input_sample_rate: u32,
}

impl LiveSetup {
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
            function_declarations: function_declarations(),
            input_sample_rate: config.input_sample_rate,
        }
    }
}

#[async_trait]
pub trait LiveSink: Send {
    async fn send(&mut self, msg: Outbound) -> Result<(), VoiceError>;

    async fn close(&mut self) -> Result<(), VoiceError>;
}

#[async_trait]
pub trait LiveStream: Send {
    /// Next server event; `None` once the endpoint has closed the session.
    async fn next_event(&mut self) -> Option<Result<ServerEvent, VoiceError>>;
}

/// An established live session.
pub struct LiveLink {
    pub sink: Box<dyn LiveSink>,
    pub stream: Box<dyn LiveStream>,
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveLink, VoiceError>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

pub fn encode_setup(setup: &LiveSetup) -> Value {
    json!({
        "setup": {
            "model": setup.model,
            "generationConfig": { "responseModalities": ["AUDIO"] },
            "systemInstruction": { "parts": [ { "text": setup.system_instruction } ] },
            "tools": [ { "functionDeclarations": setup.function_declarations } ]
        }
    })
}

pub fn encode_outbound(msg: &Outbound, input_sample_rate: u32) -> Value {
    match msg {
        Outbound::Audio(pcm) => json!({
            "realtimeInput": {
                "audio": {
                    "mimeType": format!("audio/pcm;rate={input_sample_rate}"),
                    "data": BASE64.encode(pcm)
                }
            }
        }),
        Outbound::ToolResponses(responses) => json!({
            "toolResponse": { "functionResponses": responses }
        }),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<WireServerContent>,
    tool_call: Option<WireToolCall>,
    go_away: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerContent {
    model_turn: Option<WireContent>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    inline_data: Option<WireBlob>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

/// One decoded server message.
#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    pub setup_complete: bool,
    pub go_away: bool,
    pub events: Vec<ServerEvent>,
}

pub fn decode_server_message(text: &str) -> Result<Decoded, VoiceError> {
    let wire: WireServerMessage =
        serde_json::from_str(text).map_err(|e| VoiceError::Protocol(e.to_string()))?;

    let mut decoded = Decoded {
        setup_complete: wire.setup_complete.is_some(),
        go_away: wire.go_away.is_some(),
        events: Vec::new(),
    };

    if let Some(content) = wire.server_content {
        if content.interrupted {
            decoded.events.push(ServerEvent::Interrupted);
        }
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            let Some(blob) = part.inline_data else {
                continue;
            };
            if !blob.mime_type.is_empty() && !blob.mime_type.starts_with("audio/") {
                continue;
            }
            let pcm = BASE64
                .decode(blob.data.as_bytes())
                .map_err(|e| VoiceError::Protocol(format!("bad audio payload: {e}")))?;
            decoded.events.push(ServerEvent::Audio(pcm));
        }
        if content.turn_complete {
            decoded.events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(tool_call) = wire.tool_call {
        if !tool_call.function_calls.is_empty() {
            decoded
                .events
                .push(ServerEvent::ToolCalls(tool_call.function_calls));
        }
    }

    Ok(decoded)
}

/// The JSON text of a frame. Control frames yield `None`.
fn frame_text(msg: &Message) -> Option<Result<&str, VoiceError>> {
    match msg {
        Message::Text(text) => Some(Ok(text.as_str())),
        Message::Binary(bytes) => Some(
            std::str::from_utf8(bytes)
                .map_err(|e| VoiceError::Protocol(format!("binary frame is not UTF-8: {e}"))),
        ),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

pub struct WsSink<S> {
    inner: S,
    input_sample_rate: u32,
}

#[async_trait]
impl<S> LiveSink for WsSink<S>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send,
{
    async fn send(&mut self, msg: Outbound) -> Result<(), VoiceError> {
        let payload = encode_outbound(&msg, self.input_sample_rate).to_string();
        self.inner.send(Message::Text(payload.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        self.inner.send(Message::Close(None)).await?;
        self.inner.close().await?;
        Ok(())
    }
}

pub struct WsStream<S> {
    inner: S,
    pending: VecDeque<ServerEvent>,
}

#[async_trait]
impl<S> LiveStream for WsStream<S>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<Result<ServerEvent, VoiceError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            let msg = match self.inner.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            if let Message::Close(frame) = &msg {
                tracing::info!(?frame, "live endpoint closed the session");
                return None;
            }
            let text = match frame_text(&msg) {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Some(Err(e)),
                None => continue,
            };
            match decode_server_message(text) {
                Ok(decoded) => {
                    if decoded.go_away {
                        tracing::warn!("live endpoint announced it will close the session");
                    }
                    self.pending.extend(decoded.events);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Connects to the Gemini Live WebSocket endpoint.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiLiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl GeminiLiveConnector {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{sep}key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveLink, VoiceError> {
        if self.api_key.trim().is_empty() {
            return Err(VoiceError::MissingCredentials);
        }

        let handshake = |e: tungstenite::Error| VoiceError::Handshake(e.to_string());

        let (ws, _response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(handshake)?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(encode_setup(setup).to_string().into()))
            .await
            .map_err(handshake)?;

        let mut pending = VecDeque::new();
        loop {
            let msg = match stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(handshake(e)),
                None => {
                    return Err(VoiceError::Handshake(
                        "connection closed before setup completed".to_string(),
                    ))
                }
            };
            if let Message::Close(frame) = &msg {
                return Err(VoiceError::Handshake(format!(
                    "endpoint closed during setup: {frame:?}"
                )));
            }
            let Some(text) = frame_text(&msg) else {
                continue;
            };
            let decoded = decode_server_message(text?)
                .map_err(|e| VoiceError::Handshake(e.to_string()))?;
            pending.extend(decoded.events);
            if decoded.setup_complete {
                break;
            }
        }

        tracing::info!(model = %setup.model, "live session established");

        Ok(LiveLink {
            sink: Box::new(WsSink {
                inner: sink,
                input_sample_rate: setup.input_sample_rate,
            }),
            stream: Box::new(WsStream {
                inner: stream,
                pending,
            }),
        })
    }
}
