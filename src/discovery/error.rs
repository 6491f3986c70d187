use thiserror::Error;

/// Errors from registry lookups and mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Service '{0}' not found in registry")]
    ServiceNotFound(String),

    #[error("No healthy instances available for service '{0}'")]
    NoHealthyInstance(String),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Service registry is closed")]
    Closed,
}
