//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! register(service, host, port)
//!     → registry.rs (create definition if absent, insert instance)
//!     → spawn one probe loop per instance (health/probe.rs)
//!
//! Probe loop (every check_interval):
//!     → GET http://host:port{check_endpoint}
//!     → 200 = Healthy, other status = Unhealthy, transport error = Failed
//!
//! get_instance(service)
//!     → filter Healthy instances
//!     → balancer.rs (round-robin pick)
//! ```
//!
//! # Design Decisions
//! - Topology is in-memory only and rebuilt on restart
//! - Probe loops never hold a map lock across I/O or sleeps
//! - Loop handles are owned by the registry and awaited on close

pub mod balancer;
pub mod error;
pub mod models;
pub mod registry;

pub use error::RegistryError;
pub use models::{
    InstanceSnapshot, Metadata, Registration, ServiceDefinition, ServiceInstance, ServiceSnapshot,
    ServiceStatus,
};
pub use registry::ServiceRegistry;
