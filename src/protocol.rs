//! Wire types for the OpenAI-compatible inference server.
//!
//! Streamed completions arrive as newline-delimited records of the form
//! `data: {json}`, terminated by `data: [DONE]`.

use crate::config::ModelSettings;
use serde::{Deserialize, Serialize};

/// Length of the `data: ` tag in front of every streamed record.
pub const RECORD_PREFIX_LEN: usize = 6;

const DONE_MARKER: &str = "[DONE]";

/// Body of a completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: i64,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl CompletionRequest {
    /// System message from the configured behavior, then `history\nprompt`.
    pub fn new(model: &ModelSettings, history: &str, prompt: &str) -> Self {
        Self {
            model: model.name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: model.behavior.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("{}\n{}", history, prompt),
                },
            ],
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            stream: model.stream,
        }
    }
}

/// Non-streaming completion response.
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Response of the model-list endpoint.
#[derive(Debug, Deserialize)]
pub struct ModelList {
    pub data: Vec<serde_json::Value>,
}

/// One streamed record.
#[derive(Debug, Deserialize)]
struct StreamRecord {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// What a streamed chunk carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Generated text, possibly empty.
    Delta(String),
    Done,
}

/// Decode one transport chunk into stream events.
///
/// Each non-empty line has its tag stripped and is parsed as JSON. Lines
/// that do not parse (including records split across chunks) are dropped.
pub fn decode_chunk(chunk: &[u8]) -> Vec<StreamEvent> {
    let text = String::from_utf8_lossy(chunk);
    let mut events = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let Some(payload) = line.get(RECORD_PREFIX_LEN..) else {
            continue;
        };
        let payload = payload.trim();
        if payload == DONE_MARKER {
            events.push(StreamEvent::Done);
            break;
        }

        let Ok(record) = serde_json::from_str::<StreamRecord>(payload) else {
            continue;
        };
        if let Some(delta) = record.choices.into_iter().next().and_then(|c| c.delta) {
            events.push(StreamEvent::Delta(delta.content.unwrap_or_default()));
        }
    }

    events
}
