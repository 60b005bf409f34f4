//! Canned Ollama response bodies for tests.

use serde_json::{json, Value};

/// An `/api/chat` NDJSON stream: one line per word, then the completion marker.
pub fn chat_stream(model: &str, words: &[&str], prompt_eval_count: u64, eval_count: u64) -> String {
    let mut body = String::new();
    for word in words {
        let line = json!({
            "model": model,
            "message": { "role": "assistant", "content": word },
            "done": false
        });
        body.push_str(&line.to_string());
        body.push('\n');
    }
    let marker = json!({
        "model": model,
        "message": { "role": "assistant", "content": "" },
        "done_reason": "stop",
        "done": true,
        "total_duration": 5_191_566_416u64,
        "prompt_eval_count": prompt_eval_count,
        "eval_count": eval_count,
        "eval_duration": 4_709_213_000u64
    });
    body.push_str(&marker.to_string());
    body.push('\n');
    body
}

/// `/api/ps` reply listing the given resident models.
pub fn ps_body(models: &[&str]) -> Value {
    let models: Vec<Value> = models
        .iter()
        .map(|name| json!({ "name": name, "model": name, "size": 4_661_224_676u64 }))
        .collect();
    json!({ "models": models })
}

/// `/api/tags` reply with `(name, size)` pairs.
pub fn tags_body(models: &[(&str, u64)]) -> Value {
    let models: Vec<Value> = models
        .iter()
        .map(|(name, size)| {
            json!({ "name": name, "size": size, "modified_at": "2026-10-01T12:00:00Z" })
        })
        .collect();
    json!({ "models": models })
}
