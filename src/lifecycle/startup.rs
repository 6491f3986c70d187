//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Register configured services and routes
//!
//! # Design Decisions
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::discovery::{Registration, ServiceRegistry};
use crate::http::server::AppState;
use crate::http::HttpServer;
use crate::routing::Router as ProxyRouter;
use crate::security::{AdmissionControl, Authenticator, JwtAuthenticator};

/// Build the gateway from validated configuration. Must run inside a Tokio runtime.
pub async fn bootstrap(config: GatewayConfig) -> HttpServer {
    let config = Arc::new(config);

    let registry = Arc::new(ServiceRegistry::new(&config.health_check));
    let registered = register_services(&registry, &config.services);

    let router = Arc::new(ProxyRouter::new(Arc::clone(&registry), Arc::clone(&config)));
    for route in &config.routes {
        router.add_route(route.clone());
    }

    let authenticator: Option<Arc<dyn Authenticator>> = if config.auth.enabled {
        Some(Arc::new(JwtAuthenticator::from_config(&config.auth)))
    } else {
        None
    };
    let admission = Arc::new(AdmissionControl::from_config(&config.rate_limit).await);

    info!(
        services = registered,
        routes = config.routes.len(),
        auth = config.auth.enabled,
        rate_limiter = admission.kind(),
        "Gateway initialized"
    );

    HttpServer::new(AppState {
        router,
        registry,
        authenticator,
        admission,
        config,
    })
}

/// Register each instance; one failure does not stop the rest.
/// Returns the number registered.
pub fn register_services(registry: &ServiceRegistry, services: &[Registration]) -> usize {
    services
        .iter()
        .filter(|registration| match registry.register((*registration).clone()) {
            Ok(_) => true,
            Err(e) => {
                error!(
                    service = %registration.service_name,
                    instance_id = %registration.instance_id(),
                    error = %e,
                    "Failed to register service"
                );
                false
            }
        })
        .count()
}
