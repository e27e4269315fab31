//! Prompts and fallbacks for the practitioner's text co-pilot.
//!
//! Every operation returns usable text: when no generator is configured, the
//! request fails, or the model answers with nothing, a fixed fallback is
//! returned instead of an error.

use crate::client::{ResponseFormat, TextGenerator};
use crate::error::GenAiError;
use chrono::{DateTime, NaiveDate};
use mindfulflow_types::{Appointment, Client, DocumentFile, Note, NoteAnalysis, Sentiment};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of trailing chat turns included in a chat prompt.
pub const CHAT_HISTORY_TURNS: usize = 4;

const UNAVAILABLE: &str = "Service unavailable.";

/// One turn of the co-pilot chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub text: String,
}

/// Which fallback to use for a failed generation.
struct Fallbacks {
    unconfigured: &'static str,
    empty: &'static str,
    failed: &'static str,
}

#[derive(Clone, Default)]
pub struct Assistant {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("configured", &self.generator.is_some())
            .finish()
    }
}

fn display_time(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn display_date(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Strips a Markdown code fence the model sometimes wraps JSON in.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[derive(Deserialize)]
struct RawAnalysis {
    summary: String,
    #[serde(default)]
    sentiment: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Parses the model's note analysis. Unknown sentiment labels read as
/// neutral.
pub fn parse_analysis(text: &str) -> Result<NoteAnalysis, GenAiError> {
    let raw: RawAnalysis = serde_json::from_str(strip_code_fence(text))?;
    Ok(NoteAnalysis {
        summary: raw.summary,
        sentiment: raw.sentiment.trim().parse().unwrap_or(Sentiment::Neutral),
        suggestions: raw.suggestions,
    })
}

impl Assistant {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// An assistant that always answers with fallbacks.
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.generator.is_some()
    }

    async fn generate_or(&self, prompt: &str, fallbacks: Fallbacks) -> String {
        let Some(generator) = &self.generator else {
            return fallbacks.unconfigured.to_string();
        };
        match generator.generate(prompt, ResponseFormat::Text).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(GenAiError::EmptyResponse) => fallbacks.empty.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "text generation failed, using fallback");
                fallbacks.failed.to_string()
            }
        }
    }

    /// A short morning briefing over the day's schedule.
    pub async fn daily_briefing(
        &self,
        appointments: &[Appointment],
        clients: &[Client],
        today: NaiveDate,
    ) -> String {
        let schedule = appointments
            .iter()
            .map(|a| {
                let client = clients.iter().find(|c| c.id == a.client_id);
                let who = client.map_or("an unlisted client", |c| c.name.as_str());
                match client.and_then(|c| c.diagnosis.as_deref()) {
                    Some(diagnosis) => format!("{} with {who} ({diagnosis})", display_time(&a.date)),
                    None => format!("{} with {who}", display_time(&a.date)),
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            "You are an executive assistant for a psychologist. Today is {}.\n\
             Here is the schedule: {schedule}.\n\n\
             Write a 2-3 sentence warm, minimalist morning briefing.\n\
             Mention how many sessions there are and highlight if there's a busy block.\n\
             Do not use bullet points. Be conversational and calm.",
            today.format("%A, %B %-d, %Y"),
        );

        self.generate_or(
            &prompt,
            Fallbacks {
                unconfigured: "Welcome. Please check your API key.",
                empty: "You have a few sessions today.",
                failed: "Ready for your sessions today.",
            },
        )
        .await
    }

    /// Reminds the practitioner what happened in the last session.
    pub async fn session_recap(&self, last_note: &Note, client_name: &str) -> String {
        let prompt = format!(
            "You are a helpful AI co-pilot for a psychologist.\n\
             User is seeing client \"{client_name}\".\n\
             Last session date: {}.\n\
             Last session notes: \"{}\".\n\n\
             Write a short, natural paragraph reminding the psychologist what happened last time.\n\
             End with one relevant follow-up question they might want to ask the client today.",
            display_date(&last_note.date),
            last_note.content,
        );

        self.generate_or(
            &prompt,
            Fallbacks {
                unconfigured: UNAVAILABLE,
                empty: "Could not generate recap.",
                failed: "Unable to access session history.",
            },
        )
        .await
    }

    /// Summarises a note, tags its sentiment and suggests interventions.
    pub async fn analyze_note(&self, text: &str) -> NoteAnalysis {
        let Some(generator) = &self.generator else {
            return NoteAnalysis::neutral("");
        };

        let prompt = format!(
            "Analyze these therapy notes:\n\"{text}\"\n\n\
             Output JSON with:\n\
             - \"summary\": 1 sentence summary.\n\
             - \"sentiment\": \"Positive\", \"Neutral\", or \"Concern\".\n\
             - \"suggestions\": Array of 2 very brief (3-4 words) interventions."
        );

        let result = generator
            .generate(&prompt, ResponseFormat::Json)
            .await
            .and_then(|raw| parse_analysis(&raw));
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "note analysis failed");
            NoteAnalysis::neutral("Analysis failed")
        })
    }

    /// Answers a question about a client's notes or an open document.
    pub async fn chat(&self, history: &[ChatTurn], context: &str, query: &str) -> String {
        let start = history.len().saturating_sub(CHAT_HISTORY_TURNS);
        let history = history[start..]
            .iter()
            .map(|t| format!("{}: {}", t.role, t.text))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "System: You are a helpful assistant for a psychologist. Answer based on the context provided. Be brief and professional.\n\n\
             Context (Notes/Files):\n{context}\n\n\
             Chat History:\n{history}\n\n\
             User Query: {query}"
        );

        self.generate_or(
            &prompt,
            Fallbacks {
                unconfigured: "Service unavailable",
                empty: "I couldn't find that information.",
                failed: "I'm having trouble connecting right now.",
            },
        )
        .await
    }
}

/// Builds the chat context: the open document if any, otherwise all notes.
pub fn note_context(client: &Client, active_document: Option<&DocumentFile>) -> String {
    match active_document {
        Some(doc) => format!(
            "Active File: {}\nContent: {}",
            doc.name,
            doc.content.as_deref().unwrap_or("(Simulated)")
        ),
        None => client
            .notes
            .iter()
            .map(|n| format!("Date: {}\nContent: {}", n.date, n.content))
            .collect::<Vec<_>>()
            .join("\n---\n"),
    }
}
