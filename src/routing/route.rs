//! Route definitions.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};

/// Binding from an inbound path prefix to a backend service plus policy.
///
/// Immutable once added to a router.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteDefinition {
    pub service_name: String,
    pub path_prefix: String,
    /// Allowed methods, upper case. Empty allows every method.
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_true")]
    pub strip_prefix: bool,
    /// Backend call deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_true")]
    pub circuit_breaker: bool,
    #[serde(default = "default_true")]
    pub rate_limit: bool,
    #[serde(default = "default_true")]
    pub auth_required: bool,
    /// Every scope listed here must be granted to the caller.
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> f64 {
    30.0
}

impl RouteDefinition {
    /// A route with default policy.
    pub fn new(service_name: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            path_prefix: path_prefix.into(),
            methods: default_methods(),
            strip_prefix: true,
            timeout_secs: default_timeout(),
            circuit_breaker: true,
            rate_limit: true,
            auth_required: true,
            scopes: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::from_secs(30))
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }

    /// Path sent to the backend. Always starts with `/`.
    pub fn forward_path(&self, path: &str) -> String {
        let stripped = if self.strip_prefix {
            path.strip_prefix(self.path_prefix.as_str()).unwrap_or(path)
        } else {
            path
        };
        if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{}", stripped)
        }
    }
}
