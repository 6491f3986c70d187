//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener
//! - Dispatch requests: route match → method → auth → rate limit → proxy
//! - Observability (metrics, correlation IDs)

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GatewayConfig;
use crate::discovery::ServiceRegistry;
use crate::http::request::request_id;
use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::routing::Router as ProxyRouter;
use crate::security::{authorize, AdmissionControl, Authenticator};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub registry: Arc<ServiceRegistry>,
    /// `None` when authentication is disabled.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub admission: Arc<AdmissionControl>,
    pub config: Arc<GatewayConfig>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    app: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let app = Self::build_router(state.clone());
        Self { app, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let mut app = Router::new()
            .route("/health", get(health_handler))
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler));

        if state.config.admin.enabled {
            app = app.merge(admin::setup_admin_router(state.clone()));
        }

        with_middleware(app.with_state(state))
    }

    /// The application, for in-process use.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then close the router and the registry.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.app.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        self.state.router.close();
        self.state.registry.close().await;

        tracing::info!("HTTP server stopped");
        result
    }
}

/// Outer layers shared by every route. A panicking handler becomes a JSON 500.
fn with_middleware(app: Router) -> Router {
    app.layer(CatchPanicLayer::custom(handle_panic))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");
    GatewayError::Internal.into_response()
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Main proxy handler.
/// Looks up route, applies route policy, and forwards request.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id(request.headers()).to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Proxying request"
    );

    // 1. Match Route
    let route = match state.router.get_route(&path) {
        Some(r) => r,
        None => {
            tracing::warn!(request_id = %request_id, path = %path, "No route matched");
            return reject(GatewayError::NoRoute(path), method.as_str(), "none", start_time);
        }
    };

    // 2. Method
    if !route.allows_method(&method) {
        return reject(
            GatewayError::MethodNotAllowed(method.to_string()),
            method.as_str(),
            &route.service_name,
            start_time,
        );
    }

    // 3. Authentication
    if route.auth_required {
        if let Some(authenticator) = &state.authenticator {
            if let Err(e) = authorize(authenticator.as_ref(), request.headers(), &route.scopes) {
                tracing::warn!(request_id = %request_id, path = %path, error = %e, "Authentication failed");
                return reject(e.into(), method.as_str(), &route.service_name, start_time);
            }
        }
    }

    // 4. Admission
    if route.rate_limit {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if !state.admission.check(&client).await {
            return reject(GatewayError::RateLimited, method.as_str(), &route.service_name, start_time);
        }
    }

    // 5. Forward
    match state.router.proxy(request, &route).await {
        Ok(response) => {
            metrics::record_request(
                method.as_str(),
                response.status().as_u16(),
                &route.service_name,
                start_time,
            );
            response
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                service = %route.service_name,
                error = %e,
                "Proxy error"
            );
            reject(e.into(), method.as_str(), &route.service_name, start_time)
        }
    }
}

fn reject(error: GatewayError, method: &str, service: &str, start_time: Instant) -> Response {
    metrics::record_request(method, error.status().as_u16(), service, start_time);
    error.into_response()
}
