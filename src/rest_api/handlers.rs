//! HTTP handlers for the REST API

use std::sync::atomic::Ordering;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::instrument;

use super::server::ApiState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReadyResponse {
    pub ready: bool,
    pub leader: bool,
}

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness endpoint
///
/// Standby replicas are ready too; `leader` tells which one reconciles.
#[instrument(skip(state))]
pub async fn ready(State(state): State<ApiState>) -> (StatusCode, Json<ReadyResponse>) {
    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            leader: state.is_leader.load(Ordering::Relaxed),
        }),
    )
}

/// Metrics endpoint in the Prometheus text format
#[cfg(feature = "metrics")]
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_reports_version() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_ready_reports_leadership() {
        let is_leader = Arc::new(AtomicBool::new(false));
        let state = ApiState {
            is_leader: is_leader.clone(),
        };

        let (code, Json(body)) = ready(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(
            body,
            ReadyResponse {
                ready: true,
                leader: false
            }
        );

        is_leader.store(true, Ordering::Relaxed);
        let (_, Json(body)) = ready(State(state)).await;
        assert!(body.leader);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_metrics_exposes_registry() {
        crate::controller::metrics::inc_sync_operation("Service", "create");
        let body = metrics().await.unwrap();
        assert!(body.contains("tideway_sync_operations_total"));
    }
}
