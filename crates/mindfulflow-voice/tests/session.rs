//! Session lifecycle tests against in-memory audio and endpoint fakes.

use async_trait::async_trait;
use mindfulflow_calendar::UnlinkedCalendar;
use mindfulflow_types::{Appointment, Client, ClientStatus, Note, UserData, Workspace};
use mindfulflow_voice::live::{LiveSink, LiveStream};
use mindfulflow_voice::{
    AudioBackend, AudioChunk, CaptureHandle, FunctionCall, InputStream, LiveConnector, LiveLink,
    LiveSetup, Outbound, PlaybackHandle, PlaybackOutput, RecordStore, ServerEvent, SessionState,
    SourceId, ToolDispatcher, VoiceBridge, VoiceConfig, VoiceError,
};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

async fn within<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("timed out")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// Audio fakes
// ---------------------------------------------------------------------------

struct FakeInput {
    live: Arc<AtomicBool>,
}

impl InputStream for FakeInput {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeOutput {
    started: Mutex<Vec<(SourceId, f64)>>,
    stopped: Mutex<Vec<SourceId>>,
    closed: AtomicBool,
}

impl PlaybackOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn start(&self, id: SourceId, _chunk: AudioChunk, at: f64) -> Result<(), VoiceError> {
        self.started.lock().unwrap().push((id, at));
        Ok(())
    }

    fn stop(&self, id: SourceId) {
        self.stopped.lock().unwrap().push(id);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeAudio {
    mic_live: Arc<AtomicBool>,
    mic: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    output: Arc<FakeOutput>,
    completions: Mutex<Option<mpsc::Sender<SourceId>>>,
    inputs_opened: AtomicUsize,
    fail_output: bool,
}

impl FakeAudio {
    fn mic(&self) -> mpsc::Sender<Vec<f32>> {
        self.mic.lock().unwrap().clone().expect("microphone not open")
    }

    fn unplug_mic(&self) {
        self.mic.lock().unwrap().take();
    }
}

#[async_trait]
impl AudioBackend for FakeAudio {
    async fn open_input(
        &self,
        _sample_rate: u32,
        _frame_size: usize,
    ) -> Result<CaptureHandle, VoiceError> {
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(8);
        *self.mic.lock().unwrap() = Some(tx);
        self.mic_live.store(true, Ordering::SeqCst);
        Ok(CaptureHandle {
            frames: rx,
            stream: Box::new(FakeInput {
                live: self.mic_live.clone(),
            }),
        })
    }

    async fn open_output(&self, _sample_rate: u32) -> Result<PlaybackHandle, VoiceError> {
        if self.fail_output {
            return Err(VoiceError::Output("no speakers".into()));
        }
        let (tx, rx) = mpsc::channel(8);
        *self.completions.lock().unwrap() = Some(tx);
        Ok(PlaybackHandle {
            output: self.output.clone(),
            completions: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Endpoint fakes
// ---------------------------------------------------------------------------

struct FakeSink {
    sent: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl LiveSink for FakeSink {
    async fn send(&mut self, msg: Outbound) -> Result<(), VoiceError> {
        self.sent
            .send(msg)
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeStream {
    events: mpsc::UnboundedReceiver<Result<ServerEvent, VoiceError>>,
}

#[async_trait]
impl LiveStream for FakeStream {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, VoiceError>> {
        self.events.recv().await
    }
}

/// The test's end of one fake connection.
struct RemoteEnd {
    events: mpsc::UnboundedSender<Result<ServerEvent, VoiceError>>,
    received: mpsc::UnboundedReceiver<Outbound>,
}

impl RemoteEnd {
    fn send(&self, event: ServerEvent) {
        self.events.send(Ok(event)).unwrap();
    }

    fn fail(&self, error: VoiceError) {
        self.events.send(Err(error)).unwrap();
    }
}

#[derive(Default)]
struct FakeConnector {
    remote: Mutex<Option<RemoteEnd>>,
    sink_closed: Arc<AtomicBool>,
    gate: Option<Arc<Notify>>,
    fail: bool,
}

impl FakeConnector {
    fn remote(&self) -> RemoteEnd {
        self.remote.lock().unwrap().take().expect("no connection")
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _setup: &LiveSetup) -> Result<LiveLink, VoiceError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(VoiceError::Handshake("refused".into()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        *self.remote.lock().unwrap() = Some(RemoteEnd {
            events: events_tx,
            received: sent_rx,
        });
        Ok(LiveLink {
            sink: Box::new(FakeSink {
                sent: sent_tx,
                closed: self.sink_closed.clone(),
            }),
            stream: Box::new(FakeStream { events: events_rx }),
        })
    }
}

struct NoopRecords;

#[async_trait]
impl RecordStore for NoopRecords {
    async fn add_note(&self, _: &str, _: &str, _: &Note) -> Result<(), VoiceError> {
        Ok(())
    }

    async fn update_note_content(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), VoiceError> {
        Ok(())
    }

    async fn create_appointment(&self, _: &str, _: &Appointment) -> Result<(), VoiceError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn config() -> VoiceConfig {
    VoiceConfig {
        api_key: "test-key".into(),
        shutdown_grace_ms: 200,
        ..VoiceConfig::default()
    }
}

fn tools() -> Arc<ToolDispatcher> {
    let data = UserData {
        clients: vec![Client {
            id: "c1".into(),
            name: "Sarah Jenkins".into(),
            avatar: String::new(),
            status: ClientStatus::Active,
            diagnosis: None,
            next_appointment: None,
            notes: vec![Note {
                id: "n1".into(),
                date: "2025-01-01T10:00:00Z".into(),
                content: "First session.".into(),
                summary: None,
                sentiment: None,
            }],
            documents: Vec::new(),
        }],
        appointments: Vec::new(),
    };
    Arc::new(ToolDispatcher::new(
        Arc::new(Mutex::new(Workspace::new("u1", data))),
        Arc::new(UnlinkedCalendar),
        Arc::new(NoopRecords),
    ))
}

fn bridge_with(
    config: VoiceConfig,
    audio: FakeAudio,
    connector: FakeConnector,
) -> (VoiceBridge, Arc<FakeAudio>, Arc<FakeConnector>) {
    let audio = Arc::new(audio);
    let connector = Arc::new(connector);
    let bridge = VoiceBridge::new(config, audio.clone(), connector.clone(), tools());
    (bridge, audio, connector)
}

fn bridge() -> (VoiceBridge, Arc<FakeAudio>, Arc<FakeConnector>) {
    bridge_with(config(), FakeAudio::default(), FakeConnector::default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn toggle_starts_then_stops() {
    let (bridge, audio, connector) = bridge();
    assert_eq!(bridge.state(), SessionState::Idle);

    assert_eq!(bridge.toggle().await.unwrap(), SessionState::Active);
    assert_eq!(bridge.state(), SessionState::Active);
    assert!(audio.mic_live.load(Ordering::SeqCst));

    assert_eq!(bridge.toggle().await.unwrap(), SessionState::Idle);
    assert_eq!(bridge.state(), SessionState::Idle);
    assert!(!audio.mic_live.load(Ordering::SeqCst));
    assert!(audio.output.closed.load(Ordering::SeqCst));
    assert!(connector.sink_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn missing_credentials_fail_before_opening_devices() {
    let cfg = VoiceConfig {
        api_key: String::new(),
        ..config()
    };
    let (bridge, audio, _) = bridge_with(cfg, FakeAudio::default(), FakeConnector::default());

    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::MissingCredentials));
    assert_eq!(bridge.state(), SessionState::Idle);
    assert_eq!(audio.inputs_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_handshake_releases_microphone_and_output() {
    let connector = FakeConnector {
        fail: true,
        ..FakeConnector::default()
    };
    let (bridge, audio, _) = bridge_with(config(), FakeAudio::default(), connector);

    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::Handshake(_)));
    assert_eq!(bridge.state(), SessionState::Idle);
    assert!(!audio.mic_live.load(Ordering::SeqCst));
    assert!(audio.output.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_output_releases_microphone() {
    let audio = FakeAudio {
        fail_output: true,
        ..FakeAudio::default()
    };
    let (bridge, audio, _) = bridge_with(config(), audio, FakeConnector::default());

    assert!(matches!(bridge.start().await, Err(VoiceError::Output(_))));
    assert!(!audio.mic_live.load(Ordering::SeqCst));
    assert_eq!(bridge.state(), SessionState::Idle);
}

#[tokio::test]
async fn toggle_while_connecting_is_ignored() {
    let gate = Arc::new(Notify::new());
    let connector = FakeConnector {
        gate: Some(gate.clone()),
        ..FakeConnector::default()
    };
    let (bridge, audio, _) = bridge_with(config(), FakeAudio::default(), connector);

    let starting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.start().await }
    });
    let mut state = bridge.subscribe_state();
    within(state.wait_for(|s| *s == SessionState::Connecting))
        .await
        .unwrap();

    assert_eq!(bridge.toggle().await.unwrap(), SessionState::Connecting);
    assert_eq!(audio.inputs_opened.load(Ordering::SeqCst), 1);

    gate.notify_one();
    assert_eq!(within(starting).await.unwrap().unwrap(), SessionState::Active);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn microphone_frames_stream_to_endpoint() {
    let (bridge, audio, connector) = bridge();
    bridge.start().await.unwrap();
    let mut remote = connector.remote();
    let mut volume = bridge.subscribe_volume();

    audio.mic().send(vec![0.5; 320]).await.unwrap();

    match within(remote.received.recv()).await {
        Some(Outbound::Audio(pcm)) => assert_eq!(pcm.len(), 640),
        other => panic!("expected audio, got {other:?}"),
    }
    within(volume.wait_for(|v| (*v - 0.5).abs() < 1e-6))
        .await
        .unwrap();

    bridge.stop().await.unwrap();
    assert_eq!(*bridge.subscribe_volume().borrow(), 0.0);
}

#[tokio::test]
async fn model_audio_is_scheduled_back_to_back() {
    let (bridge, audio, connector) = bridge();
    bridge.start().await.unwrap();
    let remote = connector.remote();

    // 2400 samples at 24 kHz is 0.1 s.
    let chunk = vec![0u8; 4800];
    remote.send(ServerEvent::Audio(chunk.clone()));
    remote.send(ServerEvent::Audio(chunk));

    eventually(|| audio.output.started.lock().unwrap().len() == 2).await;
    let started = audio.output.started.lock().unwrap().clone();
    assert_eq!(started[0].1, 0.0);
    assert!((started[1].1 - 0.1).abs() < 1e-9);
    assert!((bridge.playback_cursor() - 0.2).abs() < 1e-9);
    assert_eq!(bridge.active_sources(), 2);

    bridge.stop().await.unwrap();

    let mut stopped = audio.output.stopped.lock().unwrap().clone();
    stopped.sort();
    assert_eq!(stopped, vec![started[0].0, started[1].0]);
    assert_eq!(bridge.playback_cursor(), 0.0);
    assert_eq!(bridge.active_sources(), 0);
}

#[tokio::test]
async fn tool_calls_are_answered_in_one_batch() {
    let (bridge, _audio, connector) = bridge();
    bridge.start().await.unwrap();
    let mut remote = connector.remote();

    let calls = vec![
        FunctionCall {
            id: "call-1".into(),
            name: "updateClientNote".into(),
            args: json!({ "clientName": "sarah", "content": "Better sleep.", "mode": "append" }),
        },
        FunctionCall {
            id: "call-2".into(),
            name: "updateClientNote".into(),
            args: json!({ "clientName": "Nobody", "content": "x" }),
        },
    ];
    remote.send(ServerEvent::ToolCalls(calls));

    let responses = match within(remote.received.recv()).await {
        Some(Outbound::ToolResponses(r)) => r,
        other => panic!("expected tool responses, got {other:?}"),
    };
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, "call-1");
    assert!(responses[0].response.result.is_success());
    assert_eq!(responses[1].id, "call-2");
    assert!(!responses[1].response.result.is_success());

    let ws = bridge.tools().workspace();
    let content = ws.lock().unwrap().clients[0].notes[0].content.clone();
    assert_eq!(content, "First session.\nBetter sleep.");

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn remote_close_tears_down_like_stop() {
    let (bridge, audio, connector) = bridge();
    bridge.start().await.unwrap();
    let remote = connector.remote();
    let mut state = bridge.subscribe_state();

    remote.send(ServerEvent::Audio(vec![0u8; 4800]));
    eventually(|| audio.output.started.lock().unwrap().len() == 1).await;

    drop(remote);

    within(state.wait_for(|s| *s == SessionState::Idle))
        .await
        .unwrap();
    eventually(|| audio.output.closed.load(Ordering::SeqCst)).await;
    assert!(!audio.mic_live.load(Ordering::SeqCst));
    assert_eq!(bridge.playback_cursor(), 0.0);

    // A fresh session can start afterwards.
    assert_eq!(bridge.start().await.unwrap(), SessionState::Active);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn stream_error_tears_down_like_stop() {
    let (bridge, audio, connector) = bridge();
    bridge.start().await.unwrap();
    let remote = connector.remote();
    let mut state = bridge.subscribe_state();

    remote.send(ServerEvent::Audio(vec![0u8; 4800]));
    eventually(|| audio.output.started.lock().unwrap().len() == 1).await;
    assert!(bridge.playback_cursor() > 0.0);

    remote.fail(VoiceError::Protocol("malformed frame".into()));

    within(state.wait_for(|s| *s == SessionState::Idle))
        .await
        .unwrap();
    eventually(|| audio.output.closed.load(Ordering::SeqCst)).await;
    eventually(|| connector.sink_closed.load(Ordering::SeqCst)).await;
    assert!(!audio.mic_live.load(Ordering::SeqCst));
    assert_eq!(bridge.playback_cursor(), 0.0);
    assert_eq!(bridge.active_sources(), 0);
}

#[tokio::test]
async fn start_while_active_stops_the_session() {
    let (bridge, audio, connector) = bridge();
    assert_eq!(bridge.start().await.unwrap(), SessionState::Active);

    assert_eq!(bridge.start().await.unwrap(), SessionState::Idle);
    assert_eq!(bridge.state(), SessionState::Idle);
    assert!(!audio.mic_live.load(Ordering::SeqCst));
    assert!(audio.output.closed.load(Ordering::SeqCst));
    assert!(connector.sink_closed.load(Ordering::SeqCst));
    assert_eq!(audio.inputs_opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn microphone_loss_ends_the_session() {
    let (bridge, audio, _connector) = bridge();
    bridge.start().await.unwrap();
    let mut state = bridge.subscribe_state();

    audio.unplug_mic();

    within(state.wait_for(|s| *s == SessionState::Idle))
        .await
        .unwrap();
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let (bridge, audio, _) = bridge();
    assert_eq!(bridge.stop().await.unwrap(), SessionState::Idle);
    assert!(!audio.output.closed.load(Ordering::SeqCst));
}
