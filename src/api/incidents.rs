//! Incident read endpoints, review decisions, lifecycle transitions, and
//! reviewer feedback.

use crate::api::auth::authorize_service;
use crate::error::ApiError;
use crate::storage::repository::{self, IncidentRow};
use crate::types::{AuthPrincipal, IncidentStatus, ReviewDecisionKind};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct IncidentListItem {
    pub id: Uuid,
    pub dedup_key: String,
    pub service: String,
    pub env: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IncidentDetail {
    pub id: Uuid,
    pub dedup_key: String,
    pub service: String,
    pub env: String,
    pub status: IncidentStatus,
    pub service_version: Option<String>,
    pub git_sha: Option<String>,
    pub correlation_id: Option<String>,
    pub latest_alert_event_id: Option<Uuid>,
    pub alert_title: Option<String>,
    pub alert_fired_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub owners: Vec<String>,
    pub runbook_url: String,
    pub dashboard_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn list_item(incident: &IncidentRow) -> IncidentListItem {
    IncidentListItem {
        id: incident.id,
        dedup_key: incident.dedup_key.clone(),
        service: incident.service.clone(),
        env: incident.env.clone(),
        status: incident.status(),
        created_at: incident.created_at,
        updated_at: incident.updated_at,
    }
}

/// Load an incident and enforce the caller's service ACL.
async fn load_authorized(
    conn: &mut sqlx::PgConnection,
    principal: &AuthPrincipal,
    incident_id: Uuid,
) -> Result<IncidentRow, ApiError> {
    let incident = repository::get_incident(conn, incident_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("incident not found".to_string()))?;
    authorize_service(principal, &incident.service)?;
    Ok(incident)
}

/// GET /v1/incidents — list, filtered to the principal's services.
pub async fn list_incidents(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
) -> Result<Json<Vec<IncidentListItem>>, ApiError> {
    let mut tx = state.db.begin().await?;
    let incidents = repository::list_incidents(&mut tx).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.list",
        "incident",
        None,
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(
        incidents
            .iter()
            .filter(|incident| principal.allows_service(&incident.service))
            .map(list_item)
            .collect(),
    ))
}

/// GET /v1/incidents/{id}
pub async fn get_incident(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<IncidentDetail>, ApiError> {
    let mut tx = state.db.begin().await?;
    let incident = load_authorized(&mut tx, &principal, incident_id).await?;
    let alert = match incident.latest_alert_event_id {
        Some(alert_id) => repository::get_alert_event(&mut tx, alert_id).await?,
        None => None,
    };
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.read",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;

    let entry = state.registry.resolve(&incident.service);
    Ok(Json(IncidentDetail {
        id: incident.id,
        dedup_key: incident.dedup_key.clone(),
        service: incident.service.clone(),
        env: incident.env.clone(),
        status: incident.status(),
        service_version: incident.service_version.clone(),
        git_sha: incident.git_sha.clone(),
        correlation_id: incident.correlation_id.clone(),
        latest_alert_event_id: incident.latest_alert_event_id,
        alert_title: alert.as_ref().map(|a| a.title.clone()),
        alert_fired_at: alert.as_ref().map(|a| a.fired_at),
        last_error: incident.last_error.clone(),
        owners: entry.owners,
        runbook_url: entry.runbook_url,
        dashboard_url: entry.dashboard_url,
        created_at: incident.created_at,
        updated_at: incident.updated_at,
    }))
}

/// GET /v1/incidents/{id}/evidence — latest evidence pack.
pub async fn get_evidence(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let mut tx = state.db.begin().await?;
    load_authorized(&mut tx, &principal, incident_id).await?;
    let pack = repository::latest_evidence_pack(&mut tx, incident_id).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.evidence.read",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;

    let body = match pack {
        Some(pack) => serde_json::json!({
            "id": pack.id,
            "incident_id": pack.incident_id,
            "time_window_start": pack.time_window_start,
            "time_window_end": pack.time_window_end,
            "artifacts": pack.artifacts,
            "provenance": pack.provenance,
        }),
        None => Value::Null,
    };
    Ok(Json(body))
}

/// GET /v1/incidents/{id}/report — latest triage report, or the failure
/// shape when the incident is `failed` without one.
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let mut tx = state.db.begin().await?;
    let incident = load_authorized(&mut tx, &principal, incident_id).await?;
    let report = repository::get_triage_report(&mut tx, incident_id).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.report.read",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;

    let body = match report {
        Some(report) => {
            let mut body = serde_json::json!({
                "id": report.id,
                "incident_id": report.incident_id,
                "generated_at": report.generated_at,
                "model": report.model,
            });
            if let (Some(map), Some(payload)) = (body.as_object_mut(), report.payload.as_object())
            {
                for (key, value) in payload {
                    map.insert(key.clone(), value.clone());
                }
            }
            body
        }
        None if incident.status() == IncidentStatus::Failed => serde_json::json!({
            "status": "failed",
            "reason": incident.last_error,
            "message": "LLM unavailable or not configured",
        }),
        None => Value::Null,
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: ReviewDecisionKind,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /v1/incidents/{id}/decision — approve or reject the triage report.
/// Conflicts unless the incident is awaiting human review.
pub async fn post_decision(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut tx = state.db.begin().await?;
    let incident = load_authorized(&mut tx, &principal, incident_id).await?;
    if incident.status() != IncidentStatus::AwaitingHumanReview {
        return Err(ApiError::Conflict(format!(
            "decision requires awaiting_human_review, incident is {}",
            incident.status()
        )));
    }

    let new_status = match request.decision {
        ReviewDecisionKind::Approve => IncidentStatus::Triaged,
        ReviewDecisionKind::Reject => IncidentStatus::Open,
    };
    let last_error = match request.decision {
        // Reject notes become the visible reason the incident reopened.
        ReviewDecisionKind::Reject => request.notes.clone(),
        ReviewDecisionKind::Approve => None,
    };
    repository::set_incident_status(&mut tx, incident_id, new_status, last_error.as_deref())
        .await?;
    repository::create_review_decision(
        &mut tx,
        incident_id,
        request.decision,
        request.notes.as_deref(),
        &principal.subject,
    )
    .await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.decision",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({"decision": request.decision.as_str(), "notes": request.notes}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "incident_id": incident_id,
        "status": new_status,
        "decision": request.decision.as_str(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

/// POST /v1/incidents/{id}/status — post-review lifecycle moves
/// (mitigated/resolved/postmortem_required); anything else conflicts.
pub async fn post_status(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let target: IncidentStatus = request
        .status
        .parse()
        .map_err(|e: String| ApiError::Validation(e))?;
    if !matches!(
        target,
        IncidentStatus::Mitigated | IncidentStatus::Resolved | IncidentStatus::PostmortemRequired
    ) {
        return Err(ApiError::Validation(format!(
            "status endpoint only accepts mitigated, resolved, postmortem_required (got {target})"
        )));
    }

    let mut tx = state.db.begin().await?;
    let incident = load_authorized(&mut tx, &principal, incident_id).await?;
    if !incident.status().allows_manual_transition(target) {
        return Err(ApiError::Conflict(format!(
            "illegal transition {} -> {}",
            incident.status(),
            target
        )));
    }
    repository::set_incident_status(&mut tx, incident_id, target, None).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.status",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({"from": incident.status().as_str(), "to": target.as_str()}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "incident_id": incident_id,
        "status": target,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub helpful: Option<bool>,
    #[serde(default)]
    pub correct: Option<bool>,
    #[serde(default)]
    pub final_rca: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /v1/incidents/{id}/feedback — reviewer feedback on the report.
pub async fn post_feedback(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut tx = state.db.begin().await?;
    load_authorized(&mut tx, &principal, incident_id).await?;
    let id = repository::create_feedback(
        &mut tx,
        incident_id,
        request.helpful,
        request.correct,
        request.final_rca.as_deref(),
        request.notes.as_deref(),
        &principal.subject,
    )
    .await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.feedback",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({"feedback_id": id}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({"id": id, "status": "recorded"})))
}

/// GET /v1/incidents/{id}/feedback
pub async fn get_feedback(
    State(state): State<Arc<AppState>>,
    principal: AuthPrincipal,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let mut tx = state.db.begin().await?;
    load_authorized(&mut tx, &principal, incident_id).await?;
    let rows = repository::list_feedback(&mut tx, incident_id).await?;
    repository::create_audit_log(
        &mut tx,
        &principal.subject,
        "incident.feedback.read",
        "incident",
        Some(&incident_id.to_string()),
        &serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;

    let body: Vec<Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "id": row.id,
                "incident_id": row.incident_id,
                "helpful": row.helpful,
                "correct": row.correct,
                "final_rca": row.final_rca.clone(),
                "notes": row.notes.clone(),
                "created_by": row.created_by.clone(),
                "created_at": row.created_at,
            })
        })
        .collect();
    Ok(Json(Value::Array(body)))
}
