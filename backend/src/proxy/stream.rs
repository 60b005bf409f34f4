//! Metered response body.
//!
//! Wraps the upstream byte stream, passes every chunk through untouched and
//! feeds a copy to the usage scanner. Exactly one usage record is written per
//! exchange, whichever way the stream ends.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::scanner::UsageScanner;
use crate::models::usage::UsageRecord;
use crate::store::UsageRecorder;
use crate::upstream::{ByteStream, UpstreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Upstream answered, no body chunk relayed yet.
    HeadersSent,
    Streaming,
    Completed,
    Aborted,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Completed | ExchangeState::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeState::HeadersSent => "headers_sent",
            ExchangeState::Streaming => "streaming",
            ExchangeState::Completed => "completed",
            ExchangeState::Aborted => "aborted",
        }
    }
}

/// Where the finished exchange is billed.
pub struct UsageSink {
    pub recorder: Arc<dyn UsageRecorder>,
    pub key_id: String,
    pub model: Option<String>,
}

pub struct MeteredStream {
    inner: Option<ByteStream>,
    scanner: UsageScanner,
    sink: Option<UsageSink>,
    state: ExchangeState,
    relayed_bytes: u64,
    started: Instant,
}

impl MeteredStream {
    pub fn new(inner: ByteStream, sink: Option<UsageSink>) -> Self {
        Self {
            inner: Some(inner),
            scanner: UsageScanner::new(),
            sink,
            state: ExchangeState::HeadersSent,
            relayed_bytes: 0,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Enter a terminal state, release the upstream stream and bill the exchange.
    fn finish(&mut self, state: ExchangeState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.inner = None;

        let usage = self.scanner.finish().unwrap_or_default();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match state {
            ExchangeState::Completed => tracing::debug!(
                state = state.as_str(),
                bytes = self.relayed_bytes,
                prompt_tokens = usage.prompt_tokens,
                eval_tokens = usage.eval_tokens,
                elapsed_ms,
                "Proxied stream finished"
            ),
            _ => tracing::info!(
                state = state.as_str(),
                bytes = self.relayed_bytes,
                prompt_tokens = usage.prompt_tokens,
                eval_tokens = usage.eval_tokens,
                elapsed_ms,
                "Proxied stream aborted"
            ),
        }

        let Some(sink) = self.sink.take() else {
            return;
        };
        let record = UsageRecord::new(
            sink.key_id,
            sink.model,
            usage.prompt_tokens,
            usage.eval_tokens,
        );
        write_usage(sink.recorder, record);
    }
}

/// Persist a usage record off the async workers.
///
/// The store write is blocking, so it goes to the blocking pool when a
/// runtime is available. Outside a runtime it runs inline.
fn write_usage(recorder: Arc<dyn UsageRecorder>, record: UsageRecord) {
    let write = move || {
        if let Err(e) = recorder.record_usage(&record) {
            tracing::error!(key_id = %record.key_id, error = %e, "Failed to record usage");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(write);
        }
        Err(_) => write(),
    }
}

impl Stream for MeteredStream {
    type Item = Result<Bytes, UpstreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.state = ExchangeState::Streaming;
                this.relayed_bytes += chunk.len() as u64;
                this.scanner.feed(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Upstream stream failed mid-response");
                this.finish(ExchangeState::Aborted);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(ExchangeState::Completed);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        // Body dropped before the upstream finished: the caller went away.
        self.finish(ExchangeState::Aborted);
    }
}
