mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;
use std::time::Instant;

use common::TestApp;
use tillsync::health::*;

struct Fixed(&'static str, bool);

#[async_trait]
impl DependencyChecker for Fixed {
    fn name(&self) -> &'static str {
        self.0
    }

    async fn check(&self) -> DependencyStatus {
        if self.1 {
            DependencyStatus::Healthy {
                status: "healthy".to_string(),
                latency_ms: 1,
            }
        } else {
            DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: "connection refused".to_string(),
            }
        }
    }
}

#[test]
fn test_dependency_status_serialization() {
    let healthy = DependencyStatus::Healthy {
        status: "healthy".to_string(),
        latency_ms: 42,
    };
    let json = serde_json::to_value(&healthy).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["latency_ms"], 42);
    assert!(json.get("error").is_none());

    let unhealthy = DependencyStatus::Unhealthy {
        status: "unhealthy".to_string(),
        error: "timeout".to_string(),
    };
    let json = serde_json::to_value(&unhealthy).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["error"], "timeout");
    assert!(json.get("latency_ms").is_none());
}

#[tokio::test]
async fn test_postgres_failure_is_unhealthy() {
    let checks: Vec<Arc<dyn DependencyChecker>> =
        vec![Arc::new(Fixed("postgres", false)), Arc::new(Fixed("processor", true))];
    let report = check_health(&checks, Instant::now()).await;

    assert_eq!(report.status, "unhealthy");
    assert!(report.is_unhealthy());
    assert_eq!(report.dependencies.len(), 2);
}

#[tokio::test]
async fn test_open_processor_circuit_is_degraded() {
    let checks: Vec<Arc<dyn DependencyChecker>> =
        vec![Arc::new(Fixed("postgres", true)), Arc::new(Fixed("processor", false))];
    let report = check_health(&checks, Instant::now()).await;

    assert_eq!(report.status, "degraded");
    assert!(!report.is_unhealthy());
}

#[tokio::test]
async fn test_health_endpoint_needs_no_credentials() {
    let app = TestApp::new();
    let (status, body) = app.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::new();
    let (status, body) = app.get("/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/webhooks/processor").is_some());
    assert!(body["paths"].get("/tip-pools/{id}/finalize").is_some());
}
