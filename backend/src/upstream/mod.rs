//! Upstream (Ollama) client abstraction.
//!
//! The residency manager and the streaming proxy talk to the backend only
//! through the `Upstream` trait, so both can run against a recording fake.

mod ollama;

pub use ollama::OllamaClient;

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use gatekeeper_common::KeepAlive;

/// Response body as it arrives from the backend, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Backend returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),
    #[error("Stream interrupted: {0}")]
    Stream(String),
}

/// A model installed on the backend (from its tag listing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableModel {
    pub name: String,
    pub size_bytes: Option<u64>,
}

/// An inbound call to replay against the backend.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus optional `?query`, already stripped of the gateway mount.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

/// Backend response with an unbuffered body.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Models the backend currently holds in memory.
    ///
    /// Transport failures are errors; a malformed reply is an empty list.
    async fn list_resident(&self) -> Result<Vec<String>, UpstreamError>;

    /// Change a model's residency (load, pin or unload).
    async fn set_keep_alive(&self, model: &str, keep_alive: KeepAlive) -> Result<(), UpstreamError>;

    /// Models installed on the backend's disk.
    async fn list_available(&self) -> Result<Vec<AvailableModel>, UpstreamError>;

    /// Replay a request and return the streamed response.
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, UpstreamError>;
}
