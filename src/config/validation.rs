//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::resilience::CircuitConfig;

/// A single semantic problem, located by its config path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be positive"));
    }

    if config.health_check.probe_timeout_secs == 0 {
        errors.push(ValidationError::new("health_check.probe_timeout_secs", "must be positive"));
    }
    if config.health_check.error_backoff_secs == 0 {
        errors.push(ValidationError::new("health_check.error_backoff_secs", "must be positive"));
    }

    validate_circuit("circuit_breaker", &config.circuit_breaker, &mut errors);
    for (service, circuit) in &config.circuit_breakers {
        validate_circuit(&format!("circuit_breakers.{}", service), circuit, &mut errors);
    }

    for (i, service) in config.services.iter().enumerate() {
        for (name, message) in service.problems() {
            errors.push(ValidationError::new(format!("services[{}].{}", i, name), message));
        }
    }

    let mut prefixes = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = |name: &str| format!("routes[{}].{}", i, name);
        if route.service_name.is_empty() {
            errors.push(ValidationError::new(field("service_name"), "must not be empty"));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(field("path_prefix"), "must start with '/'"));
        }
        if !prefixes.insert(route.path_prefix.as_str()) {
            errors.push(ValidationError::new(
                field("path_prefix"),
                format!("duplicate prefix '{}'", route.path_prefix),
            ));
        }
        if !(route.timeout_secs.is_finite() && route.timeout_secs > 0.0) {
            errors.push(ValidationError::new(field("timeout_secs"), "must be positive"));
        }
        for method in &route.methods {
            if Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    field("methods"),
                    format!("'{}' is not an HTTP method", method),
                ));
            }
        }
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::new("rate_limit.requests_per_second", "must be positive"));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::new("rate_limit.burst_size", "must be positive"));
        }
        if config.rate_limit.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be positive"));
        }
    }

    if config.auth.enabled && config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::new(
            "auth.jwt_secret",
            "required when auth is enabled",
        ));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new(
            "admin.api_key",
            "required when the admin API is enabled",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_circuit(prefix: &str, circuit: &CircuitConfig, errors: &mut Vec<ValidationError>) {
    if circuit.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", prefix), "must be positive"));
    }
    if circuit.min_throughput == 0 {
        errors.push(ValidationError::new(format!("{}.min_throughput", prefix), "must be positive"));
    }
    if circuit.failure_window_secs == 0 {
        errors.push(ValidationError::new(format!("{}.failure_window_secs", prefix), "must be positive"));
    }
}
