//! Alert ingestion orchestration: normalize, dedup, upsert, enqueue.

use crate::adapters::{alertmanager, cloudwatch};
use crate::error::ApiError;
use crate::hashing::dedup_key_for;
use crate::storage::repository;
use crate::triage::queue::enqueue_triage;
use crate::triage::run_triage;
use crate::types::{AlertSource, IncidentStatus};
use crate::AppState;
use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub incident_id: Uuid,
    pub dedup_key: String,
    pub status: IncidentStatus,
}

/// Ingest one alert payload: persist the event, upsert the incident for its
/// dedup key, attach recent deploy context, audit, and hand the incident to
/// the triage queue. The whole write is one transaction.
pub async fn ingest_alert(
    state: &AppState,
    source: AlertSource,
    payload: &Value,
    actor: &str,
) -> Result<IngestResponse, ApiError> {
    let event = match source {
        AlertSource::Cloudwatch => cloudwatch::normalize(payload),
        AlertSource::Alertmanager => alertmanager::normalize(payload),
    }
    .map_err(|e| ApiError::Normalization(e.to_string()))?;

    // Registry key and dedup resource key are source-specific.
    let (registry_key, resource_key) = match source {
        AlertSource::Cloudwatch => {
            let alarm = event
                .resource_refs
                .get("alarm_name")
                .cloned()
                .unwrap_or_default();
            (alarm.clone(), alarm)
        }
        AlertSource::Alertmanager => (
            event.labels.get("service").cloned().unwrap_or_default(),
            event
                .resource_refs
                .get("alert_name")
                .cloned()
                .unwrap_or_default(),
        ),
    };
    let entry = state.registry.resolve(&registry_key);
    let dedup_key = dedup_key_for(
        &entry.service,
        &entry.env,
        &resource_key,
        &event.labels,
        event.correlation_id.as_deref(),
    );

    let mut tx = state.db.begin().await?;
    let alert_event_id = repository::insert_alert_event(&mut tx, &event).await?;
    let incident = repository::upsert_incident(
        &mut tx,
        &dedup_key,
        &entry.service,
        &entry.env,
        alert_event_id,
        event.correlation_id.as_deref(),
    )
    .await?;

    // Most-recent deploy shortly before the alert, attached non-destructively.
    let deploy_window_start = event.fired_at
        - Duration::minutes(state.settings.deploy_correlation_window_minutes);
    let deploys = repository::list_recent_deployments(
        &mut tx,
        &entry.service,
        &entry.env,
        deploy_window_start,
        event.fired_at,
    )
    .await?;
    if let Some(deploy) = deploys.first() {
        repository::attach_incident_version(
            &mut tx,
            incident.id,
            deploy.version.as_deref(),
            deploy.git_sha.as_deref(),
        )
        .await?;
    }

    repository::create_audit_log(
        &mut tx,
        actor,
        "alert.ingest",
        "incident",
        Some(&incident.id.to_string()),
        &serde_json::json!({
            "source": source.to_string(),
            "dedup_key": dedup_key.clone(),
            "external_id": event.external_id.clone(),
        }),
    )
    .await?;

    if !state.settings.worker_inline {
        enqueue_triage(&mut tx, incident.id, state.settings.task_max_retries).await?;
    }
    tx.commit().await?;

    info!(
        incident_id = %incident.id,
        service = %entry.service,
        source = %source,
        "Alert ingested"
    );

    // Inline mode runs the task on the ingest path (fixture demos, tests).
    // Failures are already recorded on the incident by the runner.
    if state.settings.worker_inline {
        let _ = run_triage(state, incident.id).await;
    }

    Ok(IngestResponse {
        incident_id: incident.id,
        dedup_key,
        status: incident.status(),
    })
}
