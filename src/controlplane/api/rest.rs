//! REST API Handlers
//!
//! Read-only endpoints exposing the last operations report of each topology.

use crate::controlplane::reports::{ReportStore, StoredReport};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

// =============================================================================
// Response Types
// =============================================================================

/// Report list response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportListResponse {
    pub count: usize,
    pub reports: Vec<StoredReport>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    reports: Arc<ReportStore>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(reports: Arc<ReportStore>) -> Self {
        Self { reports }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            reports: self.reports,
        };

        Router::new()
            // Report endpoints
            .route("/v1/reports", get(list_reports))
            .route("/v1/topologies/:name/report", get(get_report))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    reports: Arc<ReportStore>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List the last report of every topology
async fn list_reports(State(state): State<AppState>) -> impl IntoResponse {
    let reports = state.reports.all();
    Json(ReportListResponse {
        count: reports.len(),
        reports,
    })
}

/// Get the last report of one topology
async fn get_report(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    debug!(topology = %name, "Fetching report");
    match state.reports.get(&name) {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse {
                error: "not_found".into(),
                message: format!("No report for topology {}", name),
                details: Some("the topology has not completed a pass yet".into()),
            }),
        )
            .into_response(),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::ReportSummary;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> (Arc<ReportStore>, Router) {
        let reports = Arc::new(ReportStore::new());
        reports.insert(ReportSummary {
            topology: "topo-a".into(),
            clean: true,
            pools: vec![],
        });
        let router = RestRouter::new(reports.clone()).build();
        (reports, router)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_get_report() {
        let (_, router) = router();
        let (status, body) = get_json(router, "/v1/topologies/topo-a/report").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["topology"], "topo-a");
        assert_eq!(body["clean"], true);
        assert!(body["finishedAt"].is_string());
    }

    #[tokio::test]
    async fn test_missing_report() {
        let (_, router) = router();
        let (status, body) = get_json(router, "/v1/topologies/nope/report").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_list_reports() {
        let (reports, router) = router();
        reports.insert(ReportSummary {
            topology: "topo-b".into(),
            clean: false,
            pools: vec![],
        });
        let (status, body) = get_json(router, "/v1/reports").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["reports"][1]["topology"], "topo-b");
    }

    #[tokio::test]
    async fn test_health() {
        let (_, router) = router();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
