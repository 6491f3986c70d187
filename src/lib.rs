//! Service Gateway
//!
//! An API gateway resilience core built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌───────────────────────────────────────────────────┐
//!                          │                  SERVICE GATEWAY                  │
//!                          │                                                   │
//!     Client Request       │  ┌─────────┐   ┌──────────┐   ┌───────────────┐   │
//!     ─────────────────────┼─▶│  http   │──▶│ security │──▶│    routing    │   │
//!                          │  │ server  │   │auth/limit│   │ prefix table  │   │
//!                          │  └─────────┘   └──────────┘   └───────┬───────┘   │
//!                          │                                       │           │
//!                          │               ┌───────────────┐       ▼           │
//!                          │               │   discovery   │◀── healthy        │
//!                          │               │   registry    │    instance       │
//!                          │               └───────▲───────┘       │           │
//!                          │                       │ status        ▼           │
//!                          │               ┌───────┴───────┐ ┌───────────┐     │
//!                          │               │ health probes │ │resilience │     │
//!                          │               └───────────────┘ │  circuit  │─────┼──▶ Backend
//!                          │                                 └───────────┘     │
//!                          │  ┌─────────────────────────────────────────────┐  │
//!                          │  │ config · observability · lifecycle · admin  │  │
//!                          │  └─────────────────────────────────────────────┘  │
//!                          └───────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod config;
pub mod discovery;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use discovery::ServiceRegistry;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use resilience::CircuitBreaker;
pub use routing::Router;
