use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mindfulflow_calendar::CalendarConfig;
use mindfulflow_db::{AuthService, LocalStore, PracticeStore};
use mindfulflow_genai::Assistant;
use mindfulflow_server::middleware::SessionTokens;
use mindfulflow_server::{app, AppState};
use mindfulflow_voice::live::{LiveSink, LiveStream};
use mindfulflow_voice::{
    LiveConnector, LiveLink, LiveSetup, Outbound, ServerEvent, VoiceConfig, VoiceError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Browser = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct ChannelSink(mpsc::UnboundedSender<Outbound>);

#[async_trait]
impl LiveSink for ChannelSink {
    async fn send(&mut self, msg: Outbound) -> Result<(), VoiceError> {
        self.0
            .send(msg)
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<ServerEvent>);

#[async_trait]
impl LiveStream for ChannelStream {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, VoiceError>> {
        self.0.recv().await.map(Ok)
    }
}

/// The endpoint's side of the most recent session.
#[derive(Default)]
struct ScriptedEndpoint {
    remote: Mutex<Option<(mpsc::UnboundedSender<ServerEvent>, mpsc::UnboundedReceiver<Outbound>)>>,
}

#[async_trait]
impl LiveConnector for ScriptedEndpoint {
    async fn connect(&self, _setup: &LiveSetup) -> Result<LiveLink, VoiceError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        *self.remote.lock().unwrap() = Some((events_tx, sent_rx));
        Ok(LiveLink {
            sink: Box::new(ChannelSink(sent_tx)),
            stream: Box::new(ChannelStream(events_rx)),
        })
    }
}

async fn serve(dir: &std::path::Path, endpoint: Arc<ScriptedEndpoint>) -> (SocketAddr, SessionTokens) {
    let local = LocalStore::open(dir).unwrap();
    let tokens = SessionTokens::new("voice-secret", 3600);
    let state = AppState {
        store: PracticeStore::Local(local.clone()),
        auth: AuthService::new(None, local),
        assistant: Assistant::unconfigured(),
        tokens: tokens.clone(),
        http: reqwest::Client::new(),
        calendar: CalendarConfig::default(),
        calendar_tokens: Arc::new(RwLock::new(HashMap::new())),
        voice: VoiceConfig {
            api_key: "live-key".into(),
            frame_size: 4,
            shutdown_grace_ms: 200,
            ..VoiceConfig::default()
        },
        live: endpoint,
    };

    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, tokens)
}

/// Reads JSON messages until one of `kind` satisfies `check`.
async fn expect_message(ws: &mut Browser, kind: &str, check: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == kind && check(&value) {
                    return value;
                }
            }
        }
        panic!("socket closed before a {kind} message arrived");
    })
    .await
    .expect("timed out waiting for message")
}

async fn expect_state(ws: &mut Browser, state: &str) {
    expect_message(ws, "state", |v| v["state"] == state).await;
}

#[tokio::test]
async fn voice_socket_rejects_bad_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _) = serve(dir.path(), Arc::new(ScriptedEndpoint::default())).await;

    let err = connect_async(format!("ws://{addr}/api/voice/ws?token=forged"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(connect_async(format!("ws://{addr}/api/voice/ws"))
        .await
        .is_err());
}

#[tokio::test]
async fn voice_session_over_browser_socket() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(ScriptedEndpoint::default());
    let (addr, tokens) = serve(dir.path(), endpoint.clone()).await;

    let token = tokens.issue("u_voice");
    let (mut ws, _) = connect_async(format!("ws://{addr}/api/voice/ws?token={token}"))
        .await
        .expect("failed to connect");

    expect_state(&mut ws, "idle").await;

    ws.send(Message::Text(json!({ "type": "toggle" }).to_string().into()))
        .await
        .unwrap();
    expect_state(&mut ws, "active").await;

    let (events, mut sent) = endpoint.remote.lock().unwrap().take().expect("no session");

    // Four samples make one capture frame.
    let pcm: Vec<u8> = [1000i16, -1000, 1000, -1000]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    ws.send(Message::Binary(pcm.clone().into())).await.unwrap();

    let outbound = tokio::time::timeout(Duration::from_secs(5), sent.recv())
        .await
        .expect("timed out waiting for audio")
        .expect("endpoint closed");
    match outbound {
        Outbound::Audio(bytes) => assert_eq!(bytes.len(), pcm.len()),
        other => panic!("unexpected outbound message: {other:?}"),
    }

    events.send(ServerEvent::Audio(vec![0u8; 480])).unwrap();
    let play = expect_message(&mut ws, "play", |_| true).await;
    assert_eq!(play["sampleRate"], 24_000);
    let id = play["id"].as_u64().unwrap();

    ws.send(Message::Text(
        json!({ "type": "ended", "id": id }).to_string().into(),
    ))
    .await
    .unwrap();

    ws.send(Message::Text(json!({ "type": "toggle" }).to_string().into()))
        .await
        .unwrap();
    expect_state(&mut ws, "idle").await;
}

#[tokio::test]
async fn unknown_voice_messages_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, tokens) = serve(dir.path(), Arc::new(ScriptedEndpoint::default())).await;

    let token = tokens.issue("u_voice");
    let (mut ws, _) = connect_async(format!("ws://{addr}/api/voice/ws?token={token}"))
        .await
        .unwrap();

    ws.send(Message::Text(r#"{"type":"dance"}"#.into()))
        .await
        .unwrap();
    let error = expect_message(&mut ws, "error", |_| true).await;
    assert!(error["message"].as_str().unwrap().contains("unrecognised"));
}
