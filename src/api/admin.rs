//! Admin-only data retention endpoint.

use crate::api::auth::require_admin;
use crate::error::ApiError;
use crate::storage::repository;
use crate::types::AuthPrincipal;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    #[serde(default)]
    pub days: Option<i64>,
}

/// POST /v1/admin/purge?days=N — delete records older than N days
/// (default: the configured retention window).
pub async fn post_purge(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Query(params): Query<PurgeParams>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&principal)?;
    let days = params.days.unwrap_or(state.settings.data_retention_days);
    if days < 0 {
        return Err(ApiError::Validation("days must be non-negative".to_string()));
    }
    let cutoff = repository::retention_cutoff(Utc::now(), days);

    let mut tx = state.db.begin().await?;
    let summary = repository::purge_older_than(&mut tx, cutoff).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "admin.purge",
        "retention",
        None,
        &serde_json::json!({"days": days, "cutoff": cutoff}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "cutoff": cutoff,
        "deleted": summary,
    })))
}
