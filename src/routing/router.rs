//! Route lookup and request proxying.
//!
//! # Responsibilities
//! - Store routes and look up the match for a path
//! - Own one circuit breaker per service with a circuit-enabled route
//! - Forward requests to a healthy instance of the route's service
//!
//! # Design Decisions
//! - Lookups read an immutable snapshot (`ArcSwap`); writers copy, modify, swap
//! - Route and breaker mutations are serialized by a writer lock so the
//!   breaker set always matches the routes
//! - Explicit NoMatch rather than silent default
//! - No retries: a failed forward is returned to the caller

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use axum::body::Body;
use axum::http::{Method, Request, Response};
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::discovery::ServiceRegistry;
use crate::http::request::{build_forward_request, request_id};
use crate::http::response::into_downstream;
use crate::resilience::{CallContext, CircuitBreaker};
use crate::routing::error::{ForwardError, ProxyError};
use crate::routing::route::RouteDefinition;
use crate::routing::table::RouteTable;

type HttpClient = Client<HttpConnector, Body>;

/// Routes, breakers and the backend client.
pub struct Router {
    registry: Arc<ServiceRegistry>,
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: Arc<GatewayConfig>,
    /// `None` once closed.
    client: ArcSwapOption<HttpClient>,
}

impl Router {
    pub fn new(registry: Arc<ServiceRegistry>, config: Arc<GatewayConfig>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            table: ArcSwap::from_pointee(RouteTable::new()),
            writer: Mutex::new(()),
            breakers: DashMap::new(),
            config,
            client: ArcSwapOption::from_pointee(client),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a route, replacing any route with the same prefix.
    ///
    /// A circuit-enabled route creates its service's breaker if none exists;
    /// an existing breaker is kept as is.
    pub fn add_route(&self, route: RouteDefinition) -> Option<Arc<RouteDefinition>> {
        let _guard = self.lock_writer();
        let route = Arc::new(route);

        let mut table = RouteTable::clone(&self.table.load());
        let previous = table.insert(Arc::clone(&route));

        if route.circuit_breaker {
            self.breakers
                .entry(route.service_name.clone())
                .or_insert_with(|| {
                    debug!(service = %route.service_name, "Creating circuit breaker");
                    Arc::new(CircuitBreaker::new(
                        route.service_name.clone(),
                        self.config.circuit_config_for(&route.service_name),
                    ))
                });
        }
        if let Some(previous) = &previous {
            self.prune_breaker(&table, &previous.service_name);
        }
        self.table.store(Arc::new(table));

        info!(
            prefix = %route.path_prefix,
            service = %route.service_name,
            circuit_breaker = route.circuit_breaker,
            "Added route"
        );
        previous
    }

    /// Remove the route with exactly this prefix.
    pub fn remove_route(&self, path_prefix: &str) -> Option<Arc<RouteDefinition>> {
        let _guard = self.lock_writer();

        let mut table = RouteTable::clone(&self.table.load());
        let removed = table.remove(path_prefix)?;
        self.prune_breaker(&table, &removed.service_name);
        self.table.store(Arc::new(table));

        info!(prefix = %path_prefix, service = %removed.service_name, "Removed route");
        Some(removed)
    }

    /// Drop the service's breaker unless a remaining route still wants it.
    fn prune_breaker(&self, table: &RouteTable, service_name: &str) {
        if !table.wants_breaker(service_name) && self.breakers.remove(service_name).is_some() {
            debug!(service = %service_name, "Removed circuit breaker");
        }
    }

    /// First route, in insertion order, whose prefix matches `path`.
    pub fn get_route(&self, path: &str) -> Option<Arc<RouteDefinition>> {
        self.table.load().find(path).cloned()
    }

    pub fn routes(&self) -> Vec<Arc<RouteDefinition>> {
        self.table.load().iter().cloned().collect()
    }

    pub fn breaker(&self, service_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(service_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All breakers, ordered by service name.
    pub fn breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        breakers.sort_by(|a, b| a.name().cmp(b.name()));
        breakers
    }

    /// Forward `request` to a healthy instance of the route's service.
    ///
    /// Backend 5xx responses are passed through untouched; only transport
    /// errors and timeouts count as failures.
    pub async fn proxy(
        &self,
        request: Request<Body>,
        route: &RouteDefinition,
    ) -> Result<Response<Body>, ProxyError> {
        let client = self.client.load_full().ok_or(ProxyError::Closed)?;
        let instance = self.registry.get_instance(&route.service_name, true)?;

        let (parts, body) = request.into_parts();
        let target_path = route.forward_path(parts.uri.path());
        let target_uri = match parts.uri.query() {
            Some(query) => format!("http://{}:{}{}?{}", instance.host, instance.port, target_path, query),
            None => format!("http://{}:{}{}", instance.host, instance.port, target_path),
        };

        let body = if carries_body(&parts.method) {
            let bytes = axum::body::to_bytes(body, self.config.listener.max_body_bytes)
                .await
                .map_err(ProxyError::Body)?;
            Body::from(bytes)
        } else {
            Body::empty()
        };
        let outbound = build_forward_request(&parts, &target_uri, body)?;

        debug!(
            request_id = %request_id(&parts.headers),
            service = %route.service_name,
            instance_id = %instance.instance_id,
            target = %target_uri,
            "Forwarding request"
        );

        let timeout = route.timeout();
        let response = if route.circuit_breaker {
            let breaker = self
                .breaker(&route.service_name)
                .ok_or_else(|| ProxyError::MissingBreaker(route.service_name.clone()))?;
            let context = CallContext {
                endpoint: &target_path,
                method: parts.method.as_str(),
            };
            breaker
                .execute(context, || forward(&client, outbound, timeout))
                .await?
        } else {
            forward(&client, outbound, timeout).await.map_err(|e| {
                warn!(
                    service = %route.service_name,
                    instance_id = %instance.instance_id,
                    error = %e,
                    "Backend call failed"
                );
                e
            })?
        };

        Ok(into_downstream(response))
    }

    pub fn is_closed(&self) -> bool {
        self.client.load().is_none()
    }

    /// Release the backend client. Later proxies fail with [`ProxyError::Closed`].
    pub fn close(&self) {
        if self.client.swap(None).is_some() {
            info!("Router closed");
        }
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

async fn forward(
    client: &HttpClient,
    request: Request<Body>,
    timeout: Duration,
) -> Result<Response<Incoming>, ForwardError> {
    match tokio::time::timeout(timeout, client.request(request)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ForwardError::Timeout(timeout)),
    }
}
