//! Voice session WebSocket.
//!
//! The practitioner's browser is both microphone and speaker. It streams
//! 16-bit PCM microphone audio as binary frames and control messages as JSON;
//! the server answers with session state, microphone level and scheduled
//! playback chunks.

use crate::records::PracticeRecords;
use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use mindfulflow_types::{UserData, Workspace};
use mindfulflow_voice::audio::{decode_pcm16, encode_pcm16};
use mindfulflow_voice::{
    AudioBackend, AudioChunk, CaptureHandle, InputStream, PlaybackHandle, PlaybackOutput,
    SessionState, SourceId, ToolDispatcher, VoiceBridge, VoiceError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

/// Outgoing messages buffered per connection before audio is dropped.
const OUTGOING_QUEUE: usize = 256;

/// Capture frames buffered between the socket and the capture task.
const MIC_QUEUE: usize = 8;

#[derive(Debug, Deserialize)]
pub struct VoiceConnectParams {
    pub token: Option<String>,
}

/// Messages from the browser.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum IncomingMessage {
    Toggle,
    Start,
    Stop,
    /// A playback chunk finished on the browser's output.
    Ended { id: u64 },
}

/// Messages to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum OutgoingMessage {
    State {
        state: &'static str,
    },
    Volume {
        level: f32,
    },
    /// PCM16 chunk to start `at` seconds after the output was opened.
    Play {
        id: u64,
        at: f64,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        data: String,
    },
    StopSource {
        id: u64,
    },
    Error {
        message: String,
    },
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "idle",
        SessionState::Connecting => "connecting",
        SessionState::Active => "active",
    }
}

fn encode(msg: &OutgoingMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("failed to serialize voice message: {}", e);
            None
        }
    }
}

fn try_emit(tx: &mpsc::Sender<String>, msg: &OutgoingMessage) -> Result<(), TrySendError<String>> {
    match encode(msg) {
        Some(json) => tx.try_send(json),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Browser audio backend
// ---------------------------------------------------------------------------

struct MicFeed {
    frames: mpsc::Sender<Vec<f32>>,
    pending: Vec<f32>,
    frame_size: usize,
    live: Arc<AtomicBool>,
}

/// [`AudioBackend`] over one browser connection.
struct BrowserAudio {
    outgoing: mpsc::Sender<String>,
    mic: Mutex<Option<MicFeed>>,
    completions: Mutex<Option<mpsc::Sender<SourceId>>>,
}

impl BrowserAudio {
    fn new(outgoing: mpsc::Sender<String>) -> Self {
        Self {
            outgoing,
            mic: Mutex::new(None),
            completions: Mutex::new(None),
        }
    }

    /// Re-frames browser audio into fixed-size capture frames. Audio arriving
    /// while no session is capturing is discarded.
    fn push_mic(&self, pcm: &[u8]) {
        let mut guard = self.mic.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(feed) = guard.as_mut() else {
            return;
        };
        if !feed.live.load(Ordering::SeqCst) {
            return;
        }
        feed.pending.extend(decode_pcm16(pcm));
        while feed.pending.len() >= feed.frame_size {
            let frame: Vec<f32> = feed.pending.drain(..feed.frame_size).collect();
            match feed.frames.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("capture queue full, dropping microphone frame");
                }
                Err(TrySendError::Closed(_)) => {
                    feed.pending.clear();
                    break;
                }
            }
        }
    }

    fn notify_ended(&self, id: SourceId) {
        let guard = self
            .completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(id).is_err() {
                tracing::debug!(id = id.0, "dropped playback completion");
            }
        }
    }
}

struct BrowserInput {
    live: Arc<AtomicBool>,
}

impl InputStream for BrowserInput {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Playback on the browser. The timeline is measured on the server's clock
/// from the moment the output was opened.
struct BrowserOutput {
    outgoing: mpsc::Sender<String>,
    opened: Instant,
    closed: AtomicBool,
}

impl PlaybackOutput for BrowserOutput {
    fn current_time(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn start(&self, id: SourceId, chunk: AudioChunk, at: f64) -> Result<(), VoiceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::Output("output closed".to_string()));
        }
        let msg = OutgoingMessage::Play {
            id: id.0,
            at,
            sample_rate: chunk.sample_rate,
            data: BASE64.encode(encode_pcm16(&chunk.samples)),
        };
        try_emit(&self.outgoing, &msg).map_err(|e| VoiceError::Output(e.to_string()))
    }

    fn stop(&self, id: SourceId) {
        if let Err(e) = try_emit(&self.outgoing, &OutgoingMessage::StopSource { id: id.0 }) {
            tracing::debug!(id = id.0, error = %e, "could not send stop for playback source");
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioBackend for BrowserAudio {
    async fn open_input(
        &self,
        _sample_rate: u32,
        frame_size: usize,
    ) -> Result<CaptureHandle, VoiceError> {
        if self.outgoing.is_closed() {
            return Err(VoiceError::Microphone("browser disconnected".to_string()));
        }
        let (tx, rx) = mpsc::channel(MIC_QUEUE);
        let live = Arc::new(AtomicBool::new(true));
        *self.mic.lock().unwrap_or_else(PoisonError::into_inner) = Some(MicFeed {
            frames: tx,
            pending: Vec::with_capacity(frame_size),
            frame_size: frame_size.max(1),
            live: live.clone(),
        });
        Ok(CaptureHandle {
            frames: rx,
            stream: Box::new(BrowserInput { live }),
        })
    }

    async fn open_output(&self, _sample_rate: u32) -> Result<PlaybackHandle, VoiceError> {
        let (tx, rx) = mpsc::channel(OUTGOING_QUEUE);
        *self
            .completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(PlaybackHandle {
            output: Arc::new(BrowserOutput {
                outgoing: self.outgoing.clone(),
                opened: Instant::now(),
                closed: AtomicBool::new(false),
            }),
            completions: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Handler for `GET /api/voice/ws?token=...`.
///
/// Browsers cannot set headers on WebSocket requests, so the session token
/// travels as a query parameter.
pub async fn voice_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<VoiceConnectParams>,
) -> Response {
    let Some(user_id) = params
        .token
        .as_deref()
        .and_then(|token| state.tokens.verify(token))
    else {
        tracing::warn!("voice websocket rejected: missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    tracing::info!(user_id, "voice websocket connected");
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn load_workspace(state: &AppState, user_id: &str) -> Workspace {
    let store = state.store.clone();
    let uid = user_id.to_string();
    let data = match tokio::task::spawn_blocking(move || store.fetch_user_data(&uid)).await {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(user_id, "workspace load task failed: {}", e);
            UserData::default()
        }
    };
    Workspace::new(user_id, data)
}

/// Forwards session state and microphone level to the browser.
async fn forward_status(
    mut state: watch::Receiver<SessionState>,
    mut volume: watch::Receiver<f32>,
    tx: mpsc::Sender<String>,
) {
    let initial = OutgoingMessage::State {
        state: state_label(*state.borrow_and_update()),
    };
    if let Some(json) = encode(&initial) {
        if tx.send(json).await.is_err() {
            return;
        }
    }

    loop {
        let msg = tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                OutgoingMessage::State { state: state_label(*state.borrow_and_update()) }
            }
            changed = volume.changed() => {
                if changed.is_err() {
                    break;
                }
                OutgoingMessage::Volume { level: *volume.borrow_and_update() }
            }
        };
        // Level updates are display-only and may be dropped; state changes are not.
        let sent = match &msg {
            OutgoingMessage::Volume { .. } => try_emit(&tx, &msg).is_ok() || !tx.is_closed(),
            _ => match encode(&msg) {
                Some(json) => tx.send(json).await.is_ok(),
                None => true,
            },
        };
        if !sent {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Toggle,
    Start,
    Stop,
}

/// Runs a control action off the read loop so a slow handshake never blocks
/// incoming audio or a second toggle.
fn spawn_control(bridge: VoiceBridge, tx: mpsc::Sender<String>, control: Control) {
    tokio::spawn(async move {
        let result = match control {
            Control::Toggle => bridge.toggle().await,
            Control::Start => bridge.start().await,
            Control::Stop => bridge.stop().await,
        };
        if let Err(e) = result {
            tracing::warn!(?control, error = %e, "voice control failed");
            if let Some(json) = encode(&OutgoingMessage::Error {
                message: e.to_string(),
            }) {
                let _ = tx.send(json).await;
            }
        }
    });
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(OUTGOING_QUEUE);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let workspace = Arc::new(Mutex::new(load_workspace(&state, &user_id).await));
    let tools = Arc::new(ToolDispatcher::new(
        workspace,
        state.calendar_for(&user_id),
        Arc::new(PracticeRecords::new(state.store.clone())),
    ));
    let audio = Arc::new(BrowserAudio::new(tx.clone()));
    let bridge = VoiceBridge::new(
        state.voice.clone(),
        audio.clone(),
        state.live.clone(),
        tools,
    );

    let status_task = tokio::spawn(forward_status(
        bridge.subscribe_state(),
        bridge.subscribe_volume(),
        tx.clone(),
    ));

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Binary(bytes) => audio.push_mic(&bytes),
            AxumMessage::Text(text) => {
                match serde_json::from_str::<IncomingMessage>(text.as_str()) {
                    Ok(IncomingMessage::Toggle) => {
                        spawn_control(bridge.clone(), tx.clone(), Control::Toggle)
                    }
                    Ok(IncomingMessage::Start) => {
                        spawn_control(bridge.clone(), tx.clone(), Control::Start)
                    }
                    Ok(IncomingMessage::Stop) => {
                        spawn_control(bridge.clone(), tx.clone(), Control::Stop)
                    }
                    Ok(IncomingMessage::Ended { id }) => audio.notify_ended(SourceId(id)),
                    Err(e) => {
                        tracing::debug!(user_id, "unrecognised voice message: {}", e);
                        let _ = try_emit(
                            &tx,
                            &OutgoingMessage::Error {
                                message: format!("unrecognised message: {e}"),
                            },
                        );
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    if let Err(e) = bridge.stop().await {
        tracing::warn!(user_id, error = %e, "voice session stop failed");
    }
    status_task.abort();
    send_task.abort();
    tracing::info!(user_id, "voice websocket closed");
}
