//! In-memory service registry.
//!
//! # Responsibilities
//! - Track services and their instances
//! - Own one health probe loop per instance
//! - Select instances round-robin for the proxy
//!
//! # Design Decisions
//! - Services live in a `DashMap`; per-service mutations happen under the
//!   entry lock so a definition never exists without instances
//! - A probe loop stops as soon as its instance is no longer the one
//!   registered under its id (deregistered or replaced)
//! - `close` takes the loop set under the task lock, so no loop can be
//!   spawned after it

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::HealthCheckConfig;
use crate::discovery::error::RegistryError;
use crate::discovery::models::{Registration, ServiceDefinition, ServiceInstance, ServiceStatus};
use crate::health::{HealthProbe, ProbeOutcome};
use crate::observability::metrics;

type ServiceMap = Arc<DashMap<String, ServiceDefinition>>;

struct ProbeTasks {
    /// `None` once the registry is closed.
    probe: Option<HealthProbe>,
    set: JoinSet<()>,
}

/// Registry of live service instances.
pub struct ServiceRegistry {
    services: ServiceMap,
    tasks: Mutex<ProbeTasks>,
    error_backoff: Duration,
}

impl ServiceRegistry {
    pub fn new(config: &HealthCheckConfig) -> Self {
        Self {
            services: Arc::new(DashMap::new()),
            tasks: Mutex::new(ProbeTasks {
                probe: Some(HealthProbe::new(Duration::from_secs(config.probe_timeout_secs))),
                set: JoinSet::new(),
            }),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, ProbeTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an instance and start probing it.
    ///
    /// Re-registering an existing `host:port` replaces the instance; the
    /// previous probe loop exits on its next tick. Invalid registrations are
    /// rejected before anything changes. Must be called from
    /// within a Tokio runtime.
    pub fn register(&self, registration: Registration) -> Result<Arc<ServiceInstance>, RegistryError> {
        registration.validate()?;
        let mut tasks = self.lock_tasks();
        let probe = tasks.probe.clone().ok_or(RegistryError::Closed)?;
        while tasks.set.try_join_next().is_some() {}

        let instance = Arc::new(ServiceInstance::new(
            registration.host.clone(),
            registration.port,
            registration.metadata.clone(),
        ));
        let service_name = registration.service_name.clone();

        {
            let mut service = self
                .services
                .entry(service_name.clone())
                .or_insert_with(|| ServiceDefinition::from_registration(&registration));
            if let Some(previous) = service
                .instances
                .insert(instance.instance_id.clone(), Arc::clone(&instance))
            {
                debug!(
                    service = %service_name,
                    instance_id = %previous.instance_id,
                    "Replacing existing instance"
                );
            }
        }

        tasks.set.spawn(probe_loop(
            Arc::clone(&self.services),
            service_name.clone(),
            Arc::clone(&instance),
            probe,
            self.error_backoff,
        ));

        info!(
            service = %service_name,
            instance_id = %instance.instance_id,
            "Registered service instance"
        );
        Ok(instance)
    }

    /// Remove an instance. The service itself is dropped with its last instance.
    ///
    /// An unknown instance id within a known service is a no-op.
    pub fn deregister(&self, service_name: &str, instance_id: &str) -> Result<(), RegistryError> {
        let now_empty = {
            let mut service = self
                .services
                .get_mut(service_name)
                .ok_or_else(|| RegistryError::ServiceNotFound(service_name.to_string()))?;
            match service.instances.remove(instance_id) {
                Some(instance) => {
                    instance.set_status(ServiceStatus::Stopped);
                    info!(service = %service_name, instance_id = %instance_id, "Deregistered service instance");
                }
                None => {
                    debug!(service = %service_name, instance_id = %instance_id, "Instance not registered");
                }
            }
            service.instances.is_empty()
        };

        if now_empty
            && self
                .services
                .remove_if(service_name, |_, service| service.instances.is_empty())
                .is_some()
        {
            info!(service = %service_name, "Removed service with no instances");
        }
        Ok(())
    }

    pub fn get_service(&self, service_name: &str) -> Result<ServiceDefinition, RegistryError> {
        self.services
            .get(service_name)
            .map(|service| service.value().clone())
            .ok_or_else(|| RegistryError::ServiceNotFound(service_name.to_string()))
    }

    /// All services, ordered by name.
    pub fn list_services(&self) -> Vec<ServiceDefinition> {
        let mut services: Vec<ServiceDefinition> =
            self.services.iter().map(|entry| entry.value().clone()).collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        services
    }

    /// Pick an instance round-robin.
    ///
    /// With `healthy_only` the candidates are restricted to `Healthy`
    /// instances, taken in instance id order.
    pub fn get_instance(
        &self,
        service_name: &str,
        healthy_only: bool,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_name.to_string()))?;

        let candidates: Vec<&Arc<ServiceInstance>> = service
            .instances
            .values()
            .filter(|instance| !healthy_only || instance.is_healthy())
            .collect();
        let selected: Option<Arc<ServiceInstance>> =
            service.cursor.next(&candidates).map(|instance| Arc::clone(*instance));
        drop(candidates);

        selected.ok_or_else(|| RegistryError::NoHealthyInstance(service_name.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.lock_tasks().probe.is_none()
    }

    /// Stop every probe loop and release the probe client. Idempotent.
    pub async fn close(&self) {
        let (probe, mut set) = {
            let mut tasks = self.lock_tasks();
            let probe = tasks.probe.take();
            let set = std::mem::replace(&mut tasks.set, JoinSet::new());
            (probe, set)
        };
        if probe.is_none() {
            return;
        }

        let loops = set.len();
        set.shutdown().await;
        drop(probe);
        info!(loops, "Service registry closed");
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(&HealthCheckConfig::default())
    }
}

async fn probe_loop(
    services: ServiceMap,
    service_name: String,
    instance: Arc<ServiceInstance>,
    probe: HealthProbe,
    error_backoff: Duration,
) {
    let instance_id = instance.instance_id.clone();
    loop {
        let target = services.get(&service_name).and_then(|service| {
            let current = service.instances.get(&instance_id)?;
            Arc::ptr_eq(current, &instance).then(|| {
                (
                    HealthProbe::url(&instance.host, instance.port, &service.check_endpoint),
                    service.check_interval,
                )
            })
        });
        let Some((url, interval)) = target else {
            debug!(service = %service_name, instance_id = %instance_id, "Instance gone, stopping health checks");
            break;
        };

        match probe.check(&url).await {
            Ok(outcome) => {
                let status = outcome.status();
                let previous = instance.record_check(status);
                if let ProbeOutcome::Failed(reason) = &outcome {
                    warn!(service = %service_name, instance_id = %instance_id, error = %reason, "Health check failed");
                }
                if previous != status {
                    info!(
                        service = %service_name,
                        instance_id = %instance_id,
                        from = %previous,
                        to = %status,
                        "Instance health changed"
                    );
                }
                metrics::record_instance_health(&service_name, &instance_id, status);
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                error!(service = %service_name, instance_id = %instance_id, error = %e, "Error in health check loop");
                tokio::time::sleep(error_backoff).await;
            }
        }
    }
}
