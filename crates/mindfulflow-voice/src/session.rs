//! Voice session state machine and its worker tasks.
//!
//! A running session is four tasks joined by bounded queues:
//!
//! ```text
//! microphone -> capture -> [outbound] -> send -> live endpoint
//! live endpoint -> receive -> [playback] -> playback -> output device
//!                     \-> tool dispatch -> [outbound]
//! ```
//!
//! Stopping, a remote close, a transport error and the microphone going away
//! all end in the same teardown.

use crate::audio::{encode_pcm16, rms, AudioChunk};
use crate::config::VoiceConfig;
use crate::device::{AudioBackend, CaptureHandle, InputStream, PlaybackHandle, PlaybackOutput};
use crate::error::VoiceError;
use crate::live::{LiveConnector, LiveSetup, LiveSink, LiveStream, Outbound, ServerEvent};
use crate::playback::{PlaybackScheduler, SourceId};
use crate::tools::ToolDispatcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
}

struct RunningSession {
    generation: u64,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    input: Box<dyn InputStream>,
    output: Arc<dyn PlaybackOutput>,
}

struct Inner {
    config: VoiceConfig,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn LiveConnector>,
    tools: Arc<ToolDispatcher>,
    state: watch::Sender<SessionState>,
    volume: watch::Sender<f32>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    generation: AtomicU64,
    // Serialises start and stop.
    slot: tokio::sync::Mutex<Option<RunningSession>>,
}

fn lock(scheduler: &Mutex<PlaybackScheduler>) -> MutexGuard<'_, PlaybackScheduler> {
    scheduler.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns at most one live voice session.
///
/// Cheap to clone; clones control the same session.
#[derive(Clone)]
pub struct VoiceBridge {
    inner: Arc<Inner>,
}

impl VoiceBridge {
    pub fn new(
        config: VoiceConfig,
        audio: Arc<dyn AudioBackend>,
        connector: Arc<dyn LiveConnector>,
        tools: Arc<ToolDispatcher>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (volume, _) = watch::channel(0.0);
        Self {
            inner: Arc::new(Inner {
                config,
                audio,
                connector,
                tools,
                state,
                volume,
                scheduler: Arc::new(Mutex::new(PlaybackScheduler::new())),
                generation: AtomicU64::new(0),
                slot: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Microphone RMS level of the latest frame, for display.
    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.inner.volume.subscribe()
    }

    pub fn playback_cursor(&self) -> f64 {
        lock(&self.inner.scheduler).cursor()
    }

    pub fn active_sources(&self) -> usize {
        lock(&self.inner.scheduler).active_count()
    }

    pub fn tools(&self) -> Arc<ToolDispatcher> {
        self.inner.tools.clone()
    }

    /// Starts when idle, stops when active, does nothing while connecting.
    pub async fn toggle(&self) -> Result<SessionState, VoiceError> {
        match self.state() {
            SessionState::Idle => self.start().await,
            SessionState::Active => self.stop().await,
            SessionState::Connecting => Ok(SessionState::Connecting),
        }
    }

    /// Opens the microphone, the output and the live link, then spawns the
    /// session tasks. On failure everything opened so far is released and
    /// the bridge is idle again.
    ///
    /// Starting while a session is running stops it instead.
    pub async fn start(&self) -> Result<SessionState, VoiceError> {
        let inner = &self.inner;
        let mut slot = inner.slot.lock().await;
        if let Some(session) = slot.take() {
            tracing::debug!("start requested while active, stopping instead");
            inner.teardown(session, "stopped").await;
            return Ok(SessionState::Idle);
        }

        inner.state.send_replace(SessionState::Connecting);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match Inner::open(inner, generation).await {
            Ok(session) => {
                *slot = Some(session);
                inner.state.send_replace(SessionState::Active);
                tracing::info!(generation, "voice session active");
                Ok(SessionState::Active)
            }
            Err(e) => {
                inner.state.send_replace(SessionState::Idle);
                tracing::warn!(generation, error = %e, "voice session failed to start");
                Err(e)
            }
        }
    }

    /// Tears down the current session, if any.
    pub async fn stop(&self) -> Result<SessionState, VoiceError> {
        let mut slot = self.inner.slot.lock().await;
        if let Some(session) = slot.take() {
            self.inner.teardown(session, "stopped").await;
        }
        Ok(SessionState::Idle)
    }
}

impl Inner {
    async fn open(this: &Arc<Self>, generation: u64) -> Result<RunningSession, VoiceError> {
        let config = &this.config;
        if !config.has_credentials() {
            return Err(VoiceError::MissingCredentials);
        }

        let CaptureHandle { frames, stream: input } = this
            .audio
            .open_input(config.input_sample_rate, config.frame_size)
            .await?;

        let PlaybackHandle {
            output,
            completions,
        } = match this.audio.open_output(config.output_sample_rate).await {
            Ok(handle) => handle,
            Err(e) => {
                input.stop();
                return Err(e);
            }
        };

        let link = match this.connector.connect(&LiveSetup::from_config(config)).await {
            Ok(link) => link,
            Err(e) => {
                input.stop();
                output.close();
                return Err(e);
            }
        };

        lock(&this.scheduler).stop_all();
        this.volume.send_replace(0.0);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (out_tx, out_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (play_tx, play_rx) = mpsc::channel(config.playback_queue.max(1));
        let weak = Arc::downgrade(this);

        let tasks = vec![
            tokio::spawn(capture_task(
                frames,
                out_tx.clone(),
                this.volume.clone(),
                shutdown_rx.clone(),
                weak.clone(),
                generation,
            )),
            tokio::spawn(send_task(link.sink, out_rx, shutdown_rx.clone())),
            tokio::spawn(receive_task(
                link.stream,
                play_tx,
                out_tx,
                this.tools.clone(),
                config.output_sample_rate,
                shutdown_rx.clone(),
                weak,
                generation,
            )),
            tokio::spawn(playback_task(
                play_rx,
                completions,
                output.clone(),
                this.scheduler.clone(),
                shutdown_rx,
            )),
        ];

        Ok(RunningSession {
            generation,
            shutdown,
            tasks,
            input,
            output,
        })
    }

    async fn teardown(&self, session: RunningSession, reason: &str) {
        let RunningSession {
            generation,
            shutdown,
            tasks,
            input,
            output,
        } = session;

        tracing::info!(generation, reason, "tearing down voice session");
        shutdown.send_replace(true);
        input.stop();

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }

        let pending = lock(&self.scheduler).stop_all();
        for id in pending {
            output.stop(id);
        }
        output.close();

        self.volume.send_replace(0.0);
        self.state.send_replace(SessionState::Idle);
    }

    /// Ends session `generation` unless a newer one has replaced it.
    async fn finish(&self, generation: u64, reason: &str) {
        let mut slot = self.slot.lock().await;
        let current = slot.as_ref().map(|s| s.generation);
        if current != Some(generation) {
            tracing::debug!(generation, ?current, "ignoring end of stale voice session");
            return;
        }
        if let Some(session) = slot.take() {
            self.teardown(session, reason).await;
        }
    }
}

/// Asks the bridge to end a session from inside one of its tasks.
///
/// Runs on a fresh task because teardown waits for (and may abort) the
/// caller.
fn request_finish(inner: &Weak<Inner>, generation: u64, reason: &'static str) {
    if let Some(inner) = inner.upgrade() {
        tokio::spawn(async move { inner.finish(generation, reason).await });
    }
}

async fn capture_task(
    mut frames: mpsc::Receiver<Vec<f32>>,
    out_tx: mpsc::Sender<Outbound>,
    volume: watch::Sender<f32>,
    mut shutdown: watch::Receiver<bool>,
    inner: Weak<Inner>,
    generation: u64,
) {
    let mut dropped: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    tracing::info!(generation, "microphone stream ended");
                    request_finish(&inner, generation, "microphone ended");
                    break;
                };
                volume.send_replace(rms(&frame));
                match out_tx.try_send(Outbound::Audio(encode_pcm16(&frame))) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        tracing::trace!(dropped, "outbound queue full, dropping capture frame");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    if dropped > 0 {
        tracing::debug!(generation, dropped, "capture frames dropped during session");
    }
}

async fn send_task(
    mut sink: Box<dyn LiveSink>,
    mut out_rx: mpsc::Receiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = out_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(error = %e, "failed to send to live endpoint");
                }
            }
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "live link close failed");
    }
}

#[allow(clippy::too_many_arguments)]
async fn receive_task(
    mut stream: Box<dyn LiveStream>,
    play_tx: mpsc::Sender<AudioChunk>,
    out_tx: mpsc::Sender<Outbound>,
    tools: Arc<ToolDispatcher>,
    output_sample_rate: u32,
    mut shutdown: watch::Receiver<bool>,
    inner: Weak<Inner>,
    generation: u64,
) {
    let reason = loop {
        let event = tokio::select! {
            _ = shutdown.changed() => return,
            event = stream.next_event() => event,
        };
        match event {
            Some(Ok(ServerEvent::Audio(pcm))) => {
                let chunk = AudioChunk::from_pcm16(&pcm, output_sample_rate);
                if play_tx.send(chunk).await.is_err() {
                    break "playback stopped";
                }
            }
            Some(Ok(ServerEvent::ToolCalls(calls))) => {
                tracing::debug!(generation, count = calls.len(), "tool calls received");
                let responses = tools.dispatch_all(&calls).await;
                if out_tx.send(Outbound::ToolResponses(responses)).await.is_err() {
                    break "outbound queue closed";
                }
            }
            Some(Ok(ServerEvent::TurnComplete)) => {
                tracing::trace!(generation, "model turn complete");
            }
            Some(Ok(ServerEvent::Interrupted)) => {
                tracing::debug!(generation, "model turn interrupted");
            }
            Some(Err(e)) => {
                tracing::warn!(generation, error = %e, "live endpoint error");
                break "remote error";
            }
            None => break "remote closed",
        }
    };
    request_finish(&inner, generation, reason);
}

async fn playback_task(
    mut play_rx: mpsc::Receiver<AudioChunk>,
    mut completions: mpsc::Receiver<SourceId>,
    output: Arc<dyn PlaybackOutput>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(id) = completions.recv() => {
                lock(&scheduler).complete(id);
            }
            chunk = play_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let now = output.current_time();
                let source = {
                    let mut s = lock(&scheduler);
                    s.prune(now);
                    s.schedule(now, chunk.duration())
                };
                if let Err(e) = output.start(source.id, chunk, source.start) {
                    tracing::warn!(error = %e, "failed to start playback source");
                    lock(&scheduler).complete(source.id);
                }
            }
        }
    }
}
