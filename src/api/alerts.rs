//! Alert ingestion endpoints.

use crate::api::auth::require_ingest;
use crate::error::ApiError;
use crate::ingestion::{ingest_alert, IngestResponse};
use crate::types::{AlertSource, AuthPrincipal};
use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

/// POST /v1/alerts/cloudwatch — CloudWatch EventBridge envelope
pub async fn post_cloudwatch(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Json(payload): Json<Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    require_ingest(&principal)?;
    let response = ingest_alert(
        &state,
        AlertSource::Cloudwatch,
        &payload,
        &principal.subject,
    )
    .await?;
    Ok(Json(response))
}

/// POST /v1/alerts/alertmanager — Alertmanager webhook envelope
pub async fn post_alertmanager(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Json(payload): Json<Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    require_ingest(&principal)?;
    let response = ingest_alert(
        &state,
        AlertSource::Alertmanager,
        &payload,
        &principal.subject,
    )
    .await?;
    Ok(Json(response))
}
