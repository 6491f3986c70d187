//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Matched request:
//!     → auth.rs (bearer token → principal, scope check) if route.auth_required
//!     → rate_limit.rs (per-client admission) if route.rate_limit
//!     → Pass to proxy
//! ```
//!
//! # Design Decisions
//! - Policy is per route, enforced after route matching
//! - Authentication fails closed; a broken shared limiter fails open

pub mod auth;
pub mod rate_limit;

pub use auth::{authorize, bearer_token, AuthError, Authenticator, JwtAuthenticator, Principal};
pub use rate_limit::{AdmissionControl, LocalLimiter, RedisLimiter};
