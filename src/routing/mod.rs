//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (route lookup in table.rs)
//!     → Return: matched RouteDefinition or NoMatch
//!
//! Proxy:
//!     RouteDefinition
//!     → ServiceRegistry (healthy instance, round-robin)
//!     → CircuitBreaker (if enabled for the route)
//!     → backend call under route timeout
//!     → streamed response
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by insertion)

pub mod error;
pub mod route;
pub mod router;
pub mod table;

pub use error::{ForwardError, ProxyError};
pub use route::RouteDefinition;
pub use router::Router;
pub use table::RouteTable;
