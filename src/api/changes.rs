//! Deploy and config change-event ingestion for timeline correlation.

use crate::api::auth::require_ingest;
use crate::error::ApiError;
use crate::storage::repository;
use crate::types::AuthPrincipal;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct DeploymentRequest {
    pub service: String,
    pub env: String,
    pub deployed_at: DateTime<Utc>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub git_sha: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigChangeRequest {
    pub service: String,
    pub env: String,
    pub changed_at: DateTime<Utc>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub diff: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
}

/// POST /v1/changes/deployments
pub async fn post_deployment(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Json(request): Json<DeploymentRequest>,
) -> Result<Json<Value>, ApiError> {
    require_ingest(&principal)?;
    let metadata = request.metadata.unwrap_or_else(|| serde_json::json!({}));

    let mut tx = state.db.begin().await?;
    let id = repository::insert_deployment_event(
        &mut tx,
        &request.service,
        &request.env,
        request.deployed_at,
        request.version.as_deref(),
        request.git_sha.as_deref(),
        request.actor.as_deref(),
        request.source.as_deref(),
        &metadata,
    )
    .await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "change.deployment",
        "deployment_event",
        Some(&id.to_string()),
        &serde_json::json!({"service": request.service, "env": request.env}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({"id": id, "status": "recorded"})))
}

/// POST /v1/changes/config
pub async fn post_config_change(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Json(request): Json<ConfigChangeRequest>,
) -> Result<Json<Value>, ApiError> {
    require_ingest(&principal)?;
    let diff = request.diff.unwrap_or_else(|| serde_json::json!({}));

    let mut tx = state.db.begin().await?;
    let id: Uuid = repository::insert_config_change(
        &mut tx,
        &request.service,
        &request.env,
        request.changed_at,
        request.actor.as_deref(),
        &diff,
        request.source.as_deref(),
    )
    .await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "change.config",
        "config_change",
        Some(&id.to_string()),
        &serde_json::json!({"service": request.service, "env": request.env}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({"id": id, "status": "recorded"})))
}
