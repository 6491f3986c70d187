use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::discovery::{InstanceSnapshot, Registration, RegistryError, ServiceSnapshot};
use crate::http::server::AppState;
use crate::resilience::CircuitSnapshot;
use crate::routing::RouteDefinition;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub services: usize,
    pub routes: usize,
    pub circuits_open: usize,
    pub rate_limiter: &'static str,
}

/// Admin failures, rendered like gateway errors.
#[derive(Debug)]
pub enum AdminError {
    NotFound(String),
    Registry(RegistryError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AdminError::Registry(e @ RegistryError::ServiceNotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            AdminError::Registry(e @ RegistryError::InvalidRegistration(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            AdminError::Registry(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        };
        (status, Json(json!({ "error": message, "status": status.as_u16() }))).into_response()
    }
}

impl From<RegistryError> for AdminError {
    fn from(e: RegistryError) -> Self {
        AdminError::Registry(e)
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let circuits_open = state
        .router
        .breakers()
        .iter()
        .filter(|b| b.state() != crate::resilience::CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        services: state.registry.list_services().len(),
        routes: state.router.routes().len(),
        circuits_open,
        rate_limiter: state.admission.kind(),
    })
}

pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceSnapshot>> {
    Json(
        state
            .registry
            .list_services()
            .iter()
            .map(|service| service.snapshot())
            .collect(),
    )
}

pub async fn register_instance(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> Result<(StatusCode, Json<InstanceSnapshot>), AdminError> {
    let instance = state.registry.register(registration)?;
    Ok((StatusCode::CREATED, Json(instance.snapshot())))
}

pub async fn deregister_instance(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
) -> Result<StatusCode, AdminError> {
    state.registry.deregister(&service, &instance_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteDefinition>> {
    Json(
        state
            .router
            .routes()
            .iter()
            .map(|route| RouteDefinition::clone(route))
            .collect(),
    )
}

pub async fn list_circuits(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.router.breakers().iter().map(|b| b.snapshot()).collect())
}

pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<CircuitSnapshot>, AdminError> {
    let breaker = state
        .router
        .breaker(&service)
        .ok_or_else(|| AdminError::NotFound(format!("No circuit breaker for service '{}'", service)))?;
    breaker.reset();
    Ok(Json(breaker.snapshot()))
}
