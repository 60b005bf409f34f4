//! Byte-exact streaming proxy to the inference backend.

mod headers;
pub mod scanner;
pub mod stream;

pub use scanner::{TokenUsage, UsageScanner};
pub use stream::{ExchangeState, MeteredStream};

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;

use crate::auth::Identity;
use crate::error::{GatewayError, Result};
use crate::residency::ResidencyManager;
use crate::store::UsageRecorder;
use crate::upstream::{ForwardRequest, Upstream};
use stream::UsageSink;

/// One inbound inference call, body already buffered.
#[derive(Debug)]
pub struct RequestContext {
    pub identity: Identity,
    pub method: Method,
    /// Upstream path (mount stripped) plus optional query.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestContext {
    /// Model named by the body, for body-carrying methods only.
    pub fn target_model(&self) -> Option<String> {
        if matches!(self.method, Method::POST | Method::PUT | Method::PATCH) {
            extract_model(&self.body)
        } else {
            None
        }
    }
}

/// Read `model` from a JSON object body. Anything else is `None`.
pub fn extract_model(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("model")? {
        serde_json::Value::String(model) => Some(model.clone()),
        _ => None,
    }
}

pub struct StreamingProxy {
    upstream: Arc<dyn Upstream>,
    residency: Arc<ResidencyManager>,
    recorder: Arc<dyn UsageRecorder>,
    forward_timeout: Duration,
}

impl StreamingProxy {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        residency: Arc<ResidencyManager>,
        recorder: Arc<dyn UsageRecorder>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            upstream,
            residency,
            recorder,
            forward_timeout,
        }
    }

    /// Make room for the target model, forward, and relay the response.
    ///
    /// Only the forward call itself can fail the request; residency work is
    /// best-effort.
    pub async fn proxy(&self, ctx: RequestContext) -> Result<Response> {
        let key_id = match ctx.identity.key_id() {
            Some(id) => id.to_string(),
            None => return Err(GatewayError::Forbidden("Master key cannot be used for inference")),
        };

        let model = ctx.target_model();
        if let Some(model) = &model {
            let report = self.residency.ensure_room(model).await;
            if !report.is_empty() {
                tracing::info!(
                    model = %model,
                    evicted = ?report.evicted,
                    failed = ?report.failed,
                    "Residency pass complete"
                );
            }
        }

        let request = ForwardRequest {
            method: ctx.method,
            path_and_query: ctx.path_and_query,
            headers: headers::forwardable_request_headers(&ctx.headers),
            body: ctx.body,
            timeout: self.forward_timeout,
        };
        tracing::debug!(
            key_id = %key_id,
            method = %request.method,
            path = %request.path_and_query,
            model = ?model,
            "Forwarding request"
        );

        let upstream = self.upstream.forward(request).await?;

        let sink = UsageSink {
            recorder: self.recorder.clone(),
            key_id,
            model,
        };
        let body = MeteredStream::new(upstream.body, Some(sink));

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = upstream.status;
        *response.headers_mut() = headers::forwardable_response_headers(&upstream.headers);
        Ok(response)
    }
}
