//! Catch-all route: everything under the mount that is not an admin or
//! health route is forwarded to the backend.

use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{Request, State},
    response::Response,
    Router,
};

use crate::error::{GatewayError, Result};
use crate::proxy::RequestContext;
use crate::AppState;

async fn forward(State(state): State<Arc<AppState>>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();

    let path = state
        .config
        .proxy
        .upstream_path(parts.uri.path())
        .ok_or(GatewayError::NotFound)?;
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let identity = state.resolver.authenticate(&parts.headers)?;
    if identity.is_master() {
        return Err(GatewayError::Forbidden(
            "Master key cannot be used for inference",
        ));
    }

    let body = to_bytes(body, state.config.proxy.max_body_bytes)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Unreadable request body: {}", e)))?;

    let ctx = RequestContext {
        identity,
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    };
    state.proxy.proxy(ctx).await
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(forward).with_state(state)
}
