use chrono::{DateTime, Utc};
use serde::Serialize;

/// One metered inference exchange. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub key_id: String,
    pub model: Option<String>,
    pub prompt_tokens: u64,
    pub eval_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(key_id: String, model: Option<String>, prompt_tokens: u64, eval_tokens: u64) -> Self {
        Self {
            key_id,
            model,
            prompt_tokens,
            eval_tokens,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregated usage for one API key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyUsage {
    pub key_id: String,
    pub name: String,
    pub email: String,
    pub requests: u64,
    pub prompt_tokens: u64,
    pub eval_tokens: u64,
}

/// A recent usage record joined with its key's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentUsage {
    pub key_id: String,
    /// `None` if the key row is gone.
    pub key_name: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: u64,
    pub eval_tokens: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_keys: u64,
    pub total_requests: u64,
    pub tokens_prompt: u64,
    pub tokens_eval: u64,
    pub per_key: Vec<KeyUsage>,
    pub recent: Vec<RecentUsage>,
}
