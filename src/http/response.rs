//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform backend response for client
//! - Map gateway failures to uniform JSON error payloads
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Every proxy failure is a 503 carrying its reason

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use hyper::body::Incoming;
use serde_json::json;
use thiserror::Error;

use crate::http::request::strip_hop_by_hop;
use crate::routing::ProxyError;
use crate::security::AuthError;

/// Client-visible failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No route found for path: {0}")]
    NoRoute(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(#[from] ProxyError),

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let mut response = (
            status,
            Json(json!({ "error": self.to_string(), "status": status.as_u16() })),
        )
            .into_response();
        if matches!(self, GatewayError::Unauthorized(_)) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MalformedHeader => GatewayError::BadRequest(error.to_string()),
            AuthError::InsufficientScope(_) => GatewayError::Forbidden(error.to_string()),
            AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::Expired => {
                GatewayError::Unauthorized(error.to_string())
            }
        }
    }
}

/// Convert a backend response into the client response, streaming the body.
pub fn into_downstream(response: Response<Incoming>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
