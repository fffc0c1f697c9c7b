//! Quality and runtime metrics endpoints.

use crate::error::ApiError;
use crate::storage::repository::{self, QualityMetrics, RuntimeMetrics};
use crate::types::AuthPrincipal;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// GET /v1/metrics/quality — incident counts, review acceptance rate, and
/// average lifecycle seconds.
pub async fn get_quality(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
) -> Result<Json<QualityMetrics>, ApiError> {
    let mut tx = state.db.begin().await?;
    let metrics = repository::quality_metrics(&mut tx).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "metrics.quality",
        "metrics",
        None,
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;
    Ok(Json(metrics))
}

/// GET /v1/metrics/runtime — pipeline totals, failures, average duration,
/// and the 20 most recent runs.
pub async fn get_runtime(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
) -> Result<Json<RuntimeMetrics>, ApiError> {
    let mut tx = state.db.begin().await?;
    let metrics = repository::runtime_metrics(&mut tx).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "metrics.runtime",
        "metrics",
        None,
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;
    Ok(Json(metrics))
}
