//! Operator API over the live topology.
//!
//! Mounted under `/admin` when `admin.enabled`; every route requires the
//! configured bearer API key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(list_services).post(register_instance))
        .route(
            "/admin/services/{service}/instances/{instance_id}",
            delete(deregister_instance),
        )
        .route("/admin/routes", get(list_routes))
        .route("/admin/circuits", get(list_circuits))
        .route("/admin/circuits/{service}/reset", post(reset_circuit))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
