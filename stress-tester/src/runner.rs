//! Drives streaming chat requests through the gatekeeper and measures them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::StreamExt;
use gatekeeper_common::{ChatChunk, ChatMessage, ChatRequest};
use reqwest::{header, Client, StatusCode};
use tokio::sync::Semaphore;

use crate::config::StressConfig;
use crate::report::{BenchmarkReport, RequestMetrics};

#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),
    #[error("API key rejected ({0})")]
    Rejected(StatusCode),
    #[error("Request failed with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Stream ended without a completion line")]
    Incomplete,
}

/// Accumulates one streamed response, line by line.
#[derive(Debug)]
struct StreamTally {
    started: Instant,
    first_line_at: Option<Instant>,
    content_chunks: u64,
}

impl StreamTally {
    fn new(started: Instant) -> Self {
        Self {
            started,
            first_line_at: None,
            content_chunks: 0,
        }
    }

    /// Returns the metrics once the completion line arrives.
    fn line(&mut self, line: &str, now: Instant) -> Option<RequestMetrics> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.first_line_at.get_or_insert(now);

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparsable stream line");
                return None;
            }
        };
        if chunk.has_content() {
            self.content_chunks += 1;
        }
        if !chunk.done {
            return None;
        }

        let total_time = now.duration_since(self.started);
        let inference_time = match chunk.eval_duration {
            Some(ns) if ns > 0 => Duration::from_nanos(ns),
            _ => total_time,
        };
        Some(RequestMetrics {
            tokens: chunk.eval_count.unwrap_or(self.content_chunks),
            total_time,
            inference_time,
            time_to_first_token: self
                .first_line_at
                .map(|t| t.duration_since(self.started))
                .unwrap_or_default(),
        })
    }
}

pub struct Runner {
    client: Client,
    base_url: String,
    api_key: String,
    prompt: String,
    request_timeout: Duration,
}

impl Runner {
    pub fn new(config: &StressConfig) -> Result<Self, StressError> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.concurrency.max(1) * 2)
            .build()
            .map_err(|e| StressError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            prompt: config.prompt.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Validate connectivity and the key through a proxied model listing.
    ///
    /// Returns the number of models the backend reports. An unexpected status
    /// is logged and reported as zero models so the run can still proceed.
    pub async fn check_connection(&self) -> Result<usize, StressError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| StressError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StressError::Rejected(status));
        }
        if !status.is_success() {
            tracing::warn!(status = %status, "Unexpected status from model listing");
            return Ok(0);
        }

        let tags: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StressError::Unreachable(e.to_string()))?;
        Ok(tags["models"].as_array().map(Vec::len).unwrap_or(0))
    }

    /// Send one streaming chat request and measure it.
    pub async fn run_request(&self, model: &str) -> Result<RequestMetrics, StressError> {
        let body = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(&self.prompt)],
            stream: true,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.url("/api/chat"))
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "application/x-ndjson")
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| StressError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StressError::Status { status, body });
        }

        let mut tally = StreamTally::new(started);
        let mut pending: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StressError::Unreachable(e.to_string()))?;
            pending.extend_from_slice(&chunk);

            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(metrics) = tally.line(&line, Instant::now()) {
                    return Ok(metrics);
                }
            }
        }

        let tail = String::from_utf8_lossy(&pending);
        tally.line(&tail, Instant::now()).ok_or(StressError::Incomplete)
    }
}

/// Run `requests_per_model` requests against one model, `concurrency` at a time.
pub async fn benchmark_model(runner: Arc<Runner>, model: &str, config: &StressConfig) -> BenchmarkReport {
    tracing::info!(
        model = %model,
        concurrency = config.concurrency,
        requests = config.requests_per_model,
        "Starting benchmark"
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let stagger = config.stagger();
    let started = Instant::now();

    let tasks = (0..config.requests_per_model).map(|i| {
        let runner = runner.clone();
        let semaphore = semaphore.clone();
        let model = model.to_string();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            tokio::time::sleep(stagger * i as u32).await;

            match runner.run_request(&model).await {
                Ok(metrics) => {
                    tracing::info!(
                        request = i + 1,
                        tokens = metrics.tokens,
                        tps = metrics.tokens_per_second().unwrap_or(0.0),
                        "Request complete"
                    );
                    Some(metrics)
                }
                Err(e) => {
                    tracing::warn!(request = i + 1, error = %e, "Request failed");
                    None
                }
            }
        })
    });

    let results = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok().flatten())
        .collect();

    BenchmarkReport {
        model: model.to_string(),
        planned: config.requests_per_model,
        results,
        wall_time: started.elapsed(),
    }
}
