//! Live voice assistant for MindfulFlow.
//!
//! [`VoiceBridge`] runs one bidirectional audio session at a time against a
//! live endpoint: microphone frames stream up, model speech streams back and
//! is scheduled gaplessly on the output, and tool calls from the model are
//! executed against the practitioner's workspace by [`ToolDispatcher`].
//!
//! Audio devices and the endpoint sit behind the [`AudioBackend`] and
//! [`LiveConnector`] traits.

pub mod audio;
mod config;
pub mod device;
mod error;
pub mod live;
pub mod playback;
mod session;
pub mod tools;

pub use audio::AudioChunk;
pub use config::VoiceConfig;
pub use device::{AudioBackend, CaptureHandle, InputStream, PlaybackHandle, PlaybackOutput};
pub use error::VoiceError;
pub use live::{GeminiLiveConnector, LiveConnector, LiveLink, LiveSetup, Outbound, ServerEvent};
pub use playback::{PlaybackScheduler, SourceId};
pub use session::{SessionState, VoiceBridge};
pub use tools::{
    FunctionCall, FunctionResponse, RecordStore, ToolDispatcher, ToolResult, ToolStatus,
};
