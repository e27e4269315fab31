//! Audio device seam.
//!
//! A session opens one capture stream and one playback output through an
//! [`AudioBackend`]. The server implements it over the practitioner's
//! browser connection; tests implement it in memory.

use crate::audio::AudioChunk;
use crate::error::VoiceError;
use crate::playback::SourceId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A live microphone stream.
pub trait InputStream: Send + Sync {
    fn is_live(&self) -> bool;

    /// Stops capturing. Idempotent.
    fn stop(&self);
}

/// An opened microphone: the frames it produces and the stream controlling it.
pub struct CaptureHandle {
    pub frames: mpsc::Receiver<Vec<f32>>,
    pub stream: Box<dyn InputStream>,
}

/// A playback device with its own clock.
pub trait PlaybackOutput: Send + Sync {
    /// Output clock in seconds since the output was opened.
    fn current_time(&self) -> f64;

    /// Queues `chunk` to start at `at` on the output clock. The output reports
    /// `id` on its completion channel once the chunk has finished.
    fn start(&self, id: SourceId, chunk: AudioChunk, at: f64) -> Result<(), VoiceError>;

    /// Force-stops a queued or playing source.
    fn stop(&self, id: SourceId);

    /// Releases the output. Idempotent.
    fn close(&self);
}

/// An opened playback output and its completion notifications.
pub struct PlaybackHandle {
    pub output: Arc<dyn PlaybackOutput>,
    pub completions: mpsc::Receiver<SourceId>,
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn open_input(
        &self,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<CaptureHandle, VoiceError>;

    async fn open_output(&self, sample_rate: u32) -> Result<PlaybackHandle, VoiceError>;
}
