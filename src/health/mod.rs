//! Health checking subsystem.
//!
//! One probe loop per registered instance drives [`probe::HealthProbe`];
//! the loops themselves live in the service registry.

pub mod probe;

pub use probe::{HealthProbe, ProbeError, ProbeOutcome};
