//! Text-generation adapter for MindfulFlow.
//!
//! [`GeminiClient`] talks to the Gemini `generateContent` endpoint behind the
//! [`TextGenerator`] trait; [`Assistant`] owns the prompts and the fallback
//! texts used when generation is unavailable.

mod assistant;
mod client;
mod config;
mod error;

pub use assistant::{note_context, parse_analysis, Assistant, ChatTurn, CHAT_HISTORY_TURNS};
pub use client::{GeminiClient, ResponseFormat, TextGenerator};
pub use config::GenAiConfig;
pub use error::GenAiError;
