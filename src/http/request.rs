//! Request handling and transformation.
//!
//! # Responsibilities
//! - Prepare request for forwarding to backend
//! - Strip hop-by-hop headers in both directions
//! - Expose the request ID assigned by the middleware stack
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Original request preserved for logging; modified copy forwarded

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::request::Parts;
use axum::http::Request;

use crate::routing::ForwardError;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Request ID set by the request-id layer, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Build the backend request from the inbound parts.
///
/// `Host` is dropped so the client derives it from `uri`; `Content-Length`
/// is recomputed from the buffered body.
pub fn build_forward_request(parts: &Parts, uri: &str, body: Body) -> Result<Request<Body>, ForwardError> {
    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(body)
        .map_err(|source| ForwardError::InvalidUri {
            uri: uri.to_string(),
            source,
        })?;

    let headers = request.headers_mut();
    headers.extend(parts.headers.clone());
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    strip_hop_by_hop(headers);

    Ok(request)
}
