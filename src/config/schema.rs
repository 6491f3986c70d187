//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::discovery::Registration;
use crate::resilience::CircuitConfig;
use crate::routing::RouteDefinition;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Probe loop settings.
    pub health_check: HealthCheckConfig,

    /// Breaker settings used for every service without an override.
    pub circuit_breaker: CircuitConfig,

    /// Per-service breaker settings, keyed by service name.
    pub circuit_breakers: BTreeMap<String, CircuitConfig>,

    /// Instances registered at startup.
    pub services: Vec<Registration>,

    /// Routes added at startup, in match order.
    pub routes: Vec<RouteDefinition>,

    pub rate_limit: RateLimitConfig,

    pub auth: AuthConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Breaker settings for one service.
    pub fn circuit_config_for(&self, service_name: &str) -> CircuitConfig {
        self.circuit_breakers
            .get(service_name)
            .cloned()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Health probe configuration.
///
/// Check endpoint and interval are per service; see [`Registration`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Timeout for a single probe in seconds.
    pub probe_timeout_secs: u64,

    /// Pause after an unexpected probe loop error in seconds.
    pub error_backoff_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
            error_backoff_secs: 5,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per client.
    pub requests_per_second: u32,

    /// Burst capacity of the local limiter.
    pub burst_size: u32,

    /// Shared limiter backend. When unset, limits are tracked in process.
    pub redis_url: Option<String>,

    /// Sliding window of the shared limiter in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 10,
            burst_size: 20,
            redis_url: None,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Requests allowed per client within one shared-limiter window.
    pub fn window_limit(&self) -> u64 {
        u64::from(self.requests_per_second) * self.window_secs
    }
}

/// Bearer token authentication.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,

    /// HS256 signing secret.
    pub jwt_secret: String,

    /// Required `iss` claim, if any.
    pub issuer: Option<String>,
}

/// Admin API configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin API under `/admin`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
