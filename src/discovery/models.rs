//! Service topology types.
//!
//! A [`ServiceDefinition`] groups the live [`ServiceInstance`]s of one
//! logical service. Instance health is written only by the instance's own
//! probe loop, so it is kept in atomics rather than behind the registry lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::discovery::balancer::RoundRobin;
use crate::discovery::error::RegistryError;

/// Free-form key/value annotations.
pub type Metadata = BTreeMap<String, String>;

/// Instance health status.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Status unclear.
    Unknown = 0,
    /// Registered, not yet checked.
    Starting = 1,
    /// Last probe answered 200.
    Healthy = 2,
    /// Last probe answered with another status.
    Unhealthy = 3,
    /// Last probe failed at the transport level.
    Failed = 4,
    /// Deregistered.
    Stopped = 5,
}

impl From<u8> for ServiceStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => ServiceStatus::Starting,
            2 => ServiceStatus::Healthy,
            3 => ServiceStatus::Unhealthy,
            4 => ServiceStatus::Failed,
            5 => ServiceStatus::Stopped,
            _ => ServiceStatus::Unknown,
        }
    }
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One network-addressable process implementing a service.
#[derive(Debug)]
pub struct ServiceInstance {
    /// `host:port`, unique within its service.
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub metadata: Metadata,
    pub registered_at: SystemTime,
    status: AtomicU8,
    last_check: Mutex<Option<SystemTime>>,
}

impl ServiceInstance {
    /// Create an instance in the `Starting` state.
    pub fn new(host: impl Into<String>, port: u16, metadata: Metadata) -> Self {
        let host = host.into();
        Self {
            instance_id: Self::id_for(&host, port),
            host,
            port,
            metadata,
            registered_at: SystemTime::now(),
            status: AtomicU8::new(ServiceStatus::Starting as u8),
            last_check: Mutex::new(None),
        }
    }

    pub fn id_for(host: &str, port: u16) -> String {
        format!("{}:{}", host, port)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ServiceStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == ServiceStatus::Healthy
    }

    pub fn last_check(&self) -> Option<SystemTime> {
        *self.last_check.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a probe result, returning the previous status.
    ///
    /// A stopped instance stays stopped.
    pub(crate) fn record_check(&self, status: ServiceStatus) -> ServiceStatus {
        let stopped = ServiceStatus::Stopped as u8;
        let previous = match self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (current != stopped).then_some(status as u8)
        }) {
            Ok(previous) | Err(previous) => ServiceStatus::from(previous),
        };
        *self.last_check.lock().unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());
        previous
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.instance_id.clone(),
            host: self.host.clone(),
            port: self.port,
            status: self.status(),
            metadata: self.metadata.clone(),
            last_check: self.last_check().and_then(unix_secs),
            registered_at: unix_secs(self.registered_at),
        }
    }
}

fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Serializable view of an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub status: ServiceStatus,
    pub metadata: Metadata,
    pub last_check: Option<u64>,
    pub registered_at: Option<u64>,
}

/// A logical service and its live instances.
///
/// Exists only while it has at least one instance.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub service_name: String,
    pub instances: BTreeMap<String, Arc<ServiceInstance>>,
    pub check_endpoint: String,
    pub check_interval: Duration,
    pub metadata: Metadata,
    pub(crate) cursor: Arc<RoundRobin>,
}

impl ServiceDefinition {
    pub(crate) fn from_registration(registration: &Registration) -> Self {
        Self {
            service_name: registration.service_name.clone(),
            instances: BTreeMap::new(),
            check_endpoint: registration.check_endpoint.clone(),
            check_interval: Duration::from_secs(registration.check_interval_secs),
            metadata: registration.metadata.clone(),
            cursor: Arc::new(RoundRobin::new()),
        }
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            service_name: self.service_name.clone(),
            check_endpoint: self.check_endpoint.clone(),
            check_interval_secs: self.check_interval.as_secs(),
            metadata: self.metadata.clone(),
            instances: self.instances.values().map(|i| i.snapshot()).collect(),
        }
    }
}

/// Serializable view of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_name: String,
    pub check_endpoint: String,
    pub check_interval_secs: u64,
    pub metadata: Metadata,
    pub instances: Vec<InstanceSnapshot>,
}

/// Request to add an instance to the registry.
///
/// `check_endpoint`, `check_interval_secs` and `metadata` shape the service
/// definition only when this is the service's first instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Registration {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_check_endpoint")]
    pub check_endpoint: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_check_endpoint() -> String {
    "/health".to_string()
}

fn default_check_interval() -> u64 {
    30
}

impl Registration {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
            check_endpoint: default_check_endpoint(),
            check_interval_secs: default_check_interval(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_check(mut self, endpoint: impl Into<String>, interval_secs: u64) -> Self {
        self.check_endpoint = endpoint.into();
        self.check_interval_secs = interval_secs;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn instance_id(&self) -> String {
        ServiceInstance::id_for(&self.host, self.port)
    }

    /// Field-level problems as `(field, message)` pairs, empty when valid.
    pub fn problems(&self) -> Vec<(&'static str, &'static str)> {
        let mut problems = Vec::new();
        if self.service_name.is_empty() {
            problems.push(("service_name", "must not be empty"));
        }
        if self.host.is_empty() {
            problems.push(("host", "must not be empty"));
        }
        if self.port == 0 {
            problems.push(("port", "must not be 0"));
        }
        if !self.check_endpoint.starts_with('/') {
            problems.push(("check_endpoint", "must start with '/'"));
        }
        if self.check_interval_secs == 0 {
            problems.push(("check_interval_secs", "must be positive"));
        }
        problems
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        let problems = self.problems();
        if problems.is_empty() {
            return Ok(());
        }
        Err(RegistryError::InvalidRegistration(
            problems
                .iter()
                .map(|(field, message)| format!("{} {}", field, message))
                .collect::<Vec<_>>()
                .join(", "),
        ))
    }
}
