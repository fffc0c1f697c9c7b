//! HTTP API route registration.

pub mod admin;
pub mod alerts;
pub mod auth;
pub mod changes;
pub mod incidents;
pub mod metrics;

use crate::AppState;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Maximum request payload size (1 MB).
const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Build the complete API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        // Alert ingestion
        .route("/alerts/cloudwatch", post(alerts::post_cloudwatch))
        .route("/alerts/alertmanager", post(alerts::post_alertmanager))
        // Change events for timeline correlation
        .route("/changes/deployments", post(changes::post_deployment))
        .route("/changes/config", post(changes::post_config_change))
        // Incidents
        .route("/incidents", get(incidents::list_incidents))
        .route("/incidents/{id}", get(incidents::get_incident))
        .route("/incidents/{id}/evidence", get(incidents::get_evidence))
        .route("/incidents/{id}/report", get(incidents::get_report))
        .route("/incidents/{id}/decision", post(incidents::post_decision))
        .route("/incidents/{id}/status", post(incidents::post_status))
        .route(
            "/incidents/{id}/feedback",
            post(incidents::post_feedback).get(incidents::get_feedback),
        )
        // Metrics
        .route("/metrics/quality", get(metrics::get_quality))
        .route("/metrics/runtime", get(metrics::get_runtime))
        // Admin
        .route("/admin/purge", post(admin::post_purge));

    Router::new()
        .nest("/v1", v1)
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(MAX_PAYLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health — liveness, no auth.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
