//! End-to-end tests: client → gateway → mock backend.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use service_gateway::config::GatewayConfig;
use service_gateway::discovery::Registration;
use service_gateway::lifecycle::bootstrap;
use service_gateway::resilience::{CircuitConfig, CircuitState};
use service_gateway::routing::RouteDefinition;
use service_gateway::security::JwtAuthenticator;
use tower::ServiceExt;

mod common;

use common::{client, start_service, start_slow_service, traffic, TestGateway};

fn service(name: &str, addr: std::net::SocketAddr) -> Registration {
    Registration::new(name, addr.ip().to_string(), addr.port()).with_check("/health", 1)
}

fn open_route(service: &str, prefix: &str) -> RouteDefinition {
    let mut route = RouteDefinition::new(service, prefix);
    route.auth_required = false;
    route.rate_limit = false;
    route
}

#[tokio::test]
async fn test_proxy_strips_prefix_and_keeps_query() {
    let (backend, log) = start_service(|request| Some((200, format!("hello from {}", request.target)))).await;

    let mut config = GatewayConfig::default();
    config.services.push(service("users", backend));
    config.routes.push(open_route("users", "/api/users"));
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("users").await;

    let res = client()
        .get(gateway.url("/api/users/42?expand=true"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let request_id = res
        .headers()
        .get("x-request-id")
        .expect("request id on response")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(res.text().await.unwrap(), "hello from /42?expand=true");

    let seen = traffic(&log);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].header("x-request-id"), Some(request_id.as_str()));

    gateway.stop().await;
}

#[tokio::test]
async fn test_post_body_is_forwarded() {
    let (backend, log) = start_service(|request| Some((201, request.body.clone()))).await;

    let mut config = GatewayConfig::default();
    config.services.push(service("items", backend));
    let mut route = open_route("items", "/items");
    route.strip_prefix = false;
    config.routes.push(route);
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("items").await;

    let res = client()
        .post(gateway.url("/items"))
        .body(r#"{"name":"widget"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 201);
    assert_eq!(res.text().await.unwrap(), r#"{"name":"widget"}"#);
    assert_eq!(traffic(&log)[0].target, "/items");

    gateway.stop().await;
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let server = bootstrap(GatewayConfig::default()).await;

    let res = server
        .app()
        .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_method_not_allowed() {
    let mut config = GatewayConfig::default();
    let mut route = open_route("svc", "/svc");
    route.methods = vec!["GET".to_string()];
    config.routes.push(route);
    let server = bootstrap(config).await;

    let res = server
        .app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/svc/thing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_gateway_health_endpoint() {
    let server = bootstrap(GatewayConfig::default()).await;

    let res = server
        .app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_no_healthy_instance_is_503() {
    let port = common::closed_port().await;

    let mut config = GatewayConfig::default();
    config
        .services
        .push(Registration::new("down", "127.0.0.1", port).with_check("/health", 1));
    config.routes.push(open_route("down", "/down"));
    let gateway = TestGateway::start(config).await;

    let res = client().get(gateway.url("/down/x")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["error"],
        "Service unavailable: No healthy instances available for service 'down'"
    );

    gateway.stop().await;
}

#[tokio::test]
async fn test_circuit_opens_and_stops_calling_backend() {
    // Health checks pass, every proxied call has its connection dropped.
    let (backend, log) = start_service(|_| None).await;

    let mut config = GatewayConfig::default();
    config.circuit_breaker = CircuitConfig {
        failure_threshold: 3,
        recovery_timeout_secs: 60,
        ..CircuitConfig::default()
    };
    config.services.push(service("flaky", backend));
    config.routes.push(open_route("flaky", "/x"));
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("flaky").await;

    let http = client();
    for _ in 0..3 {
        let res = http.get(gateway.url("/x/work")).send().await.unwrap();
        assert_eq!(res.status(), 503);
        let body: Value = res.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("is unavailable"));
    }
    let calls_before_open = traffic(&log).len();
    assert!(calls_before_open >= 3);

    let breaker = gateway.state.router.breaker("flaky").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    let res = http.get(gateway.url("/x/work")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Circuit breaker is open for service flaky"));
    assert_eq!(traffic(&log).len(), calls_before_open);

    gateway.stop().await;
}

#[tokio::test]
async fn test_backend_5xx_passes_through() {
    let (backend, _log) = start_service(|_| Some((500, "boom".to_string()))).await;

    let mut config = GatewayConfig::default();
    config.circuit_breaker.failure_threshold = 1;
    config.services.push(service("err", backend));
    config.routes.push(open_route("err", "/err"));
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("err").await;

    for _ in 0..2 {
        let res = client().get(gateway.url("/err")).send().await.unwrap();
        assert_eq!(res.status(), 500);
        assert_eq!(res.text().await.unwrap(), "boom");
    }
    assert_eq!(
        gateway.state.router.breaker("err").unwrap().state(),
        CircuitState::Closed
    );

    gateway.stop().await;
}

#[tokio::test]
async fn test_backend_timeout_is_503() {
    let (backend, _log) = start_slow_service(Duration::from_secs(2)).await;

    let mut config = GatewayConfig::default();
    config.services.push(service("slow", backend));
    let mut route = open_route("slow", "/slow");
    route.timeout_secs = 0.1;
    route.circuit_breaker = false;
    config.routes.push(route);
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("slow").await;

    let res = client().get(gateway.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("did not respond"));

    gateway.stop().await;
}

#[tokio::test]
async fn test_auth_and_scopes() {
    let (backend, _log) = start_service(|_| Some((200, "secret data".to_string()))).await;

    let mut config = GatewayConfig::default();
    config.auth.enabled = true;
    config.auth.jwt_secret = "test-secret".to_string();
    config.services.push(service("intent", backend));
    let mut route = open_route("intent", "/intent");
    route.auth_required = true;
    route.scopes = vec!["intent:read".to_string()];
    config.routes.push(route);
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("intent").await;

    let issuer = JwtAuthenticator::new("test-secret", None);
    let good = issuer
        .issue("alice", &["intent:read"], Duration::from_secs(300))
        .unwrap();
    let unscoped = issuer.issue("bob", &[], Duration::from_secs(300)).unwrap();
    let http = client();

    let res = http.get(gateway.url("/intent")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = http
        .get(gateway.url("/intent"))
        .header("authorization", "Basic abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let res = http
        .get(gateway.url("/intent"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = http
        .get(gateway.url("/intent"))
        .bearer_auth(&unscoped)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    let res = http
        .get(gateway.url("/intent"))
        .bearer_auth(&good)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "secret data");

    gateway.stop().await;
}

#[tokio::test]
async fn test_local_rate_limit() {
    let (backend, _log) = start_service(|_| Some((200, "ok".to_string()))).await;

    let mut config = GatewayConfig::default();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 1;
    config.rate_limit.burst_size = 2;
    config.services.push(service("limited", backend));
    let mut route = open_route("limited", "/limited");
    route.rate_limit = true;
    config.routes.push(route);
    let gateway = TestGateway::start(config).await;
    gateway.wait_healthy("limited").await;

    let http = client();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(http.get(gateway.url("/limited")).send().await.unwrap().status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);

    gateway.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_router_and_registry() {
    let (backend, _log) = start_service(|_| Some((200, "ok".to_string()))).await;

    let mut config = GatewayConfig::default();
    config.services.push(service("svc", backend));
    config.routes.push(open_route("svc", "/svc"));
    let gateway = TestGateway::start(config).await;
    let state = gateway.state.clone();

    gateway.stop().await;

    assert!(state.router.is_closed());
    assert!(state.registry.is_closed());
}

#[tokio::test]
async fn test_admin_api() {
    let (backend, _log) = start_service(|_| Some((200, "ok".to_string()))).await;

    let mut config = GatewayConfig::default();
    config.admin.enabled = true;
    config.admin.api_key = "admin-key".to_string();
    config.routes.push(open_route("late", "/late"));
    let gateway = TestGateway::start(config).await;
    let http = client();

    let res = http.get(gateway.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = http
        .post(gateway.url("/admin/services"))
        .bearer_auth("admin-key")
        .json(&serde_json::json!({
            "service_name": "late",
            "host": "127.0.0.1",
            "port": backend.port(),
            "check_interval_secs": 0,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], 400);
    assert!(gateway.state.registry.get_service("late").is_err());

    let res = http
        .post(gateway.url("/admin/services"))
        .bearer_auth("admin-key")
        .json(&serde_json::json!({
            "service_name": "late",
            "host": "127.0.0.1",
            "port": backend.port(),
            "check_interval_secs": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    let instance: Value = res.json().await.unwrap();
    assert_eq!(instance["instance_id"], format!("127.0.0.1:{}", backend.port()));

    gateway.wait_healthy("late").await;
    let res = http.get(gateway.url("/late")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    let services: Value = http
        .get(gateway.url("/admin/services"))
        .bearer_auth("admin-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services[0]["service_name"], "late");
    assert_eq!(services[0]["instances"][0]["status"], "healthy");

    let circuits: Value = http
        .get(gateway.url("/admin/circuits"))
        .bearer_auth("admin-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(circuits[0]["state"], "closed");

    let res = http
        .post(gateway.url("/admin/circuits/late/reset"))
        .bearer_auth("admin-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = http
        .post(gateway.url("/admin/circuits/nobody/reset"))
        .bearer_auth("admin-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = http
        .delete(gateway.url(&format!(
            "/admin/services/late/instances/127.0.0.1:{}",
            backend.port()
        )))
        .bearer_auth("admin-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);
    assert!(gateway.state.registry.get_service("late").is_err());

    gateway.stop().await;
}
