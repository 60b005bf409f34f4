//! Incremental scan of a streamed response for the completion marker.
//!
//! Ollama ends a streamed generation with a line like
//! `{"done":true,...,"prompt_eval_count":26,"eval_count":290}`. The scanner
//! reassembles lines across chunk boundaries, holding only the unterminated
//! tail, and keeps the counters from the last marker seen.

use std::borrow::Cow;

/// Longest partial line kept between chunks.
pub const MAX_PENDING_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub eval_tokens: u64,
}

#[derive(Debug, Default)]
pub struct UsageScanner {
    pending: Vec<u8>,
    /// Set while skipping the rest of an over-long line.
    discarding: bool,
    usage: Option<TokenUsage>,
}

impl UsageScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the response body.
    pub fn feed(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            if self.discarding {
                self.discarding = false;
            } else if self.pending.is_empty() {
                self.inspect(head);
            } else {
                self.pending.extend_from_slice(head);
                let line = std::mem::take(&mut self.pending);
                self.inspect(&line);
            }
            rest = &tail[1..];
        }

        if self.discarding || rest.is_empty() {
            return;
        }
        if self.pending.len() + rest.len() > MAX_PENDING_LINE {
            tracing::debug!("Dropping over-long response line from usage scan");
            self.pending.clear();
            self.discarding = true;
        } else {
            self.pending.extend_from_slice(rest);
        }
    }

    /// Scan a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<TokenUsage> {
        if !self.discarding && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.inspect(&line);
        }
        self.usage
    }

    /// Counters from the last completion marker seen so far.
    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }

    fn inspect(&mut self, line: &[u8]) {
        let line: Cow<'_, str> = String::from_utf8_lossy(line);
        if let Some(usage) = parse_completion_marker(&line) {
            self.usage = Some(usage);
        }
    }
}

/// Parse a completion marker out of one line, wherever it sits in the line.
pub fn parse_completion_marker(line: &str) -> Option<TokenUsage> {
    if !has_done_flag(line) {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens: integer_after_key(line, "\"prompt_eval_count\"").unwrap_or(0),
        eval_tokens: integer_after_key(line, "\"eval_count\"").unwrap_or(0),
    })
}

fn has_done_flag(line: &str) -> bool {
    line.match_indices("\"done\"").any(|(idx, key)| {
        value_after(line, idx + key.len()).is_some_and(|v| v.starts_with("true"))
    })
}

fn integer_after_key(line: &str, key: &str) -> Option<u64> {
    line.match_indices(key).find_map(|(idx, key)| {
        let value = value_after(line, idx + key.len())?;
        let end = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        value[..end].parse().ok()
    })
}

/// The text following `"key"` and its colon, leading whitespace skipped.
fn value_after(line: &str, key_end: usize) -> Option<&str> {
    let rest = line[key_end..].trim_start();
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start())
}
