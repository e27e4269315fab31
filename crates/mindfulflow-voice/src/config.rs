use serde::{Deserialize, Serialize};
use std::fmt;

fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
        .to_string()
}

fn default_model() -> String {
    "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string()
}

fn default_system_instruction() -> String {
    "You are a helpful assistant for a psychologist's organizer app. You can schedule \
     appointments on Google Calendar and edit client notes. Be concise. When scheduling, \
     confirm the time."
        .to_string()
}

fn default_input_sample_rate() -> u32 {
    16_000
}

fn default_output_sample_rate() -> u32 {
    24_000
}

fn default_frame_size() -> usize {
    4096
}

fn default_outbound_queue() -> usize {
    32
}

fn default_playback_queue() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    500
}

/// Live voice session settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Live endpoint API key. A session cannot start without one.
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// WebSocket URL of the live endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// Microphone capture rate in Hz.
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,

    /// Rate of the audio returned by the endpoint, in Hz.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    /// Samples per capture frame.
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// Capacity of the capture-to-network queue. Frames are dropped when full.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Capacity of the network-to-playback queue.
    #[serde(default = "default_playback_queue")]
    pub playback_queue: usize,

    /// How long session tasks get to exit on their own before being aborted.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            system_instruction: default_system_instruction(),
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            frame_size: default_frame_size(),
            outbound_queue: default_outbound_queue(),
            playback_queue: default_playback_queue(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceConfig")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("frame_size", &self.frame_size)
            .field("outbound_queue", &self.outbound_queue)
            .field("playback_queue", &self.playback_queue)
            .field("shutdown_grace_ms", &self.shutdown_grace_ms)
            .finish()
    }
}

impl VoiceConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}
