//! Error types surfaced to gateway callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::store::StoreError;
use crate::upstream::UpstreamError;

/// Errors on the primary request path.
///
/// Each variant maps to exactly one HTTP status. Messages for upstream and
/// store failures are generic; the detail only goes to the log.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Inference backend unavailable")]
    UpstreamUnreachable(#[source] UpstreamError),

    #[error("Internal storage error")]
    StoreFailure(#[source] StoreError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::BadRequest(_) => "invalid_request",
            GatewayError::NotFound => "not_found",
            GatewayError::UpstreamUnreachable(_) => "upstream_unreachable",
            GatewayError::StoreFailure(_) => "internal_error",
        }
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(e: UpstreamError) -> Self {
        GatewayError::UpstreamUnreachable(e)
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::StoreFailure(e)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::UpstreamUnreachable(e) => {
                tracing::error!(error = %e, "Upstream call failed");
            }
            GatewayError::StoreFailure(e) => {
                tracing::error!(error = %e, "Store operation failed");
            }
            _ => {}
        }

        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string()
            }
        }));

        (self.status(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
