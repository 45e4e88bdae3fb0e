//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, http::StatusCode};
use purchase_queue_core::store::AdmissionStore;
use serde::Serialize;
use std::time::Instant;

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// One dependency's health.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    /// Component name.
    pub component: &'static str,
    /// Whether it answered.
    pub healthy: bool,
    /// Round-trip time.
    pub latency_ms: u64,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness response body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Readiness {
    /// `"ready"` or `"not_ready"`.
    pub status: &'static str,
    /// Per-dependency results.
    pub checks: Vec<ComponentHealth>,
}

/// Readiness check: the service can only admit buyers while the fast store
/// answers.
///
/// # Status Codes
///
/// - 200 OK: fast store reachable
/// - 503 Service Unavailable: fast store down
///
/// # Response
///
/// ```json
/// {
///   "status": "ready",
///   "checks": [{ "component": "fast_store", "healthy": true, "latencyMs": 1 }]
/// }
/// ```
pub async fn readiness_check(store: &dyn AdmissionStore) -> (StatusCode, Json<Readiness>) {
    let started = Instant::now();
    let result = store.ping().await;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let check = ComponentHealth {
        component: "fast_store",
        healthy: result.is_ok(),
        latency_ms,
        error: result.err().map(|e| e.to_string()),
    };
    if let Some(error) = &check.error {
        tracing::warn!(component = check.component, error = %error, "Readiness check failed");
    }

    let (status, label) = if check.healthy {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };
    (
        status,
        Json(Readiness {
            status: label,
            checks: vec![check],
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use purchase_queue_testing::InMemoryAdmissionStore;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readiness_follows_fast_store() {
        let store = InMemoryAdmissionStore::new();

        let (status, Json(body)) = readiness_check(&store).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ready");

        store.set_unavailable(true);
        let (status, Json(body)) = readiness_check(&store).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.checks[0].healthy);
        assert!(body.checks[0].error.is_some());
    }
}
