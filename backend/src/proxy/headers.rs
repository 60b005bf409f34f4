//! Header filtering between the caller and the backend.

use axum::http::header::{self, HeaderMap, HeaderName};

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers to send upstream.
///
/// The gateway credential stays at the gateway. `host` and `content-length`
/// are recomputed by the client for the new connection.
pub fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, &[header::AUTHORIZATION, header::HOST, header::CONTENT_LENGTH])
}

/// Headers to relay back to the caller.
pub fn forwardable_response_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, &[])
}

fn filter(headers: &HeaderMap, extra: &[HeaderName]) -> HeaderMap {
    let named_in_connection = connection_tokens(headers);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str())
            || extra.contains(name)
            || named_in_connection.iter().any(|t| t == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Extra headers declared hop-by-hop through `Connection: a, b`.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
