use std::time::Duration;

use thiserror::Error;

use crate::discovery::RegistryError;
use crate::resilience::CircuitError;

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid backend URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: axum::http::Error,
    },

    #[error("backend request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

/// Any failure while proxying a request. Surfaced to clients as 503.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Circuit(#[from] CircuitError<ForwardError>),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),

    #[error("no circuit breaker for service '{0}'")]
    MissingBreaker(String),

    #[error("router is closed")]
    Closed,
}
