//! Ollama native API types.
//!
//! Only the fields the gatekeeper and the stress tester read are modelled;
//! everything else in the upstream payloads is ignored on deserialization.

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

/// Residency directive sent with a generate request.
///
/// Ollama accepts a negative number for "never unload", zero for
/// "unload now" and a duration string for bounded residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    Indefinite,
    Unload,
    For(Duration),
}

impl Serialize for KeepAlive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeepAlive::Indefinite => serializer.serialize_i64(-1),
            KeepAlive::Unload => serializer.serialize_i64(0),
            KeepAlive::For(d) => serializer.serialize_str(&format!("{}s", d.as_secs())),
        }
    }
}

/// Body for `POST /api/generate` used purely to change a model's residency.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub keep_alive: KeepAlive,
}

impl GenerateRequest {
    /// Empty-prompt request: loads (or unloads) the model without generating.
    pub fn residency(model: &str, keep_alive: KeepAlive) -> Self {
        Self {
            model: model.to_string(),
            prompt: String::new(),
            stream: false,
            keep_alive,
        }
    }
}

/// Response from `GET /api/ps`.
#[derive(Debug, Clone, Deserialize)]
pub struct PsResponse {
    #[serde(default)]
    pub models: Vec<PsModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PsModel {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Response from `GET /api/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

/// One line of a streamed `/api/chat` response.
///
/// The final line has `done: true` and carries the token counters.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Nanoseconds spent generating, excluding model load time.
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

impl ChatChunk {
    /// Whether this chunk carries generated text.
    pub fn has_content(&self) -> bool {
        self.message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .is_some()
    }
}
