//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend call for a circuit-enabled route:
//!     → circuit_breaker.rs (admit or fail fast)
//!     → call runs under the route timeout
//!     → outcome recorded; failures may open the circuit
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - No hidden retries: a failed call is surfaced to the caller
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;

pub use circuit_breaker::{
    CallContext, CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState,
    CircuitStats,
};
