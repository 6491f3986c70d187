//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → proxy handler (route, method, auth, admission)
//!     → routing::Router::proxy
//!     → request.rs (forwarded request, hop-by-hop stripping)
//!     → response.rs (streamed backend response or uniform JSON error)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::GatewayError;
pub use server::{AppState, HttpServer};
