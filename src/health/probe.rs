//! Active health probing.
//!
//! # Responsibilities
//! - Issue one `GET` against an instance's check endpoint
//! - Classify the answer into a [`ServiceStatus`]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time;

use crate::discovery::ServiceStatus;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Instance answered 200.
    Healthy,
    /// Instance answered with any other status.
    Unhealthy(StatusCode),
    /// Connection error or timeout.
    Failed(String),
}

impl ProbeOutcome {
    pub fn status(&self) -> ServiceStatus {
        match self {
            ProbeOutcome::Healthy => ServiceStatus::Healthy,
            ProbeOutcome::Unhealthy(_) => ServiceStatus::Unhealthy,
            ProbeOutcome::Failed(_) => ServiceStatus::Failed,
        }
    }
}

/// The probe request could not be built.
#[derive(Debug, Error)]
#[error("invalid health check URL '{url}': {source}")]
pub struct ProbeError {
    pub url: String,
    #[source]
    pub source: axum::http::Error,
}

/// Shared health check client.
#[derive(Clone)]
pub struct HealthProbe {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    pub fn url(host: &str, port: u16, endpoint: &str) -> String {
        format!("http://{}:{}{}", host, port, endpoint)
    }

    pub async fn check(&self, url: &str) -> Result<ProbeOutcome, ProbeError> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header("user-agent", "service-gateway-health-check")
            .body(Body::empty())
            .map_err(|source| ProbeError {
                url: url.to_string(),
                source,
            })?;

        let outcome = match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => ProbeOutcome::Healthy,
            Ok(Ok(response)) => ProbeOutcome::Unhealthy(response.status()),
            Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
            Err(_) => ProbeOutcome::Failed(format!("timed out after {:?}", self.timeout)),
        };
        Ok(outcome)
    }
}
