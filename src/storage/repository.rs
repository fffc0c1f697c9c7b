//! SQL operations for incidents and their artifacts.
//!
//! Every function takes `&mut PgConnection` so callers decide the
//! transaction scope; audit rows and state transitions commit together with
//! the work they describe.

use crate::types::{AlertEvent, IncidentStatus, ReviewDecisionKind};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::BTreeMap;
use uuid::Uuid;

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertEventRow {
    pub id: Uuid,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub severity: String,
    pub state: String,
    pub correlation_id: Option<String>,
    pub fired_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub labels: Value,
    pub annotations: Value,
    pub resource_refs: Value,
    pub raw_payload: Value,
    pub created_at: DateTime<Utc>,
}

impl AlertEventRow {
    pub fn resource_ref(&self, key: &str) -> Option<String> {
        self.resource_refs
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn annotation(&self, key: &str) -> Option<String> {
        self.annotations
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IncidentRow {
    pub id: Uuid,
    pub dedup_key: String,
    pub service: String,
    pub env: String,
    pub service_version: Option<String>,
    pub git_sha: Option<String>,
    pub correlation_id: Option<String>,
    pub status: String,
    pub latest_alert_event_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IncidentRow {
    /// Parsed lifecycle status; unknown values read as `failed` so they are
    /// visible instead of silently treated as workable.
    pub fn status(&self) -> IncidentStatus {
        self.status.parse().unwrap_or(IncidentStatus::Failed)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EvidencePackRow {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    pub artifacts: Value,
    pub provenance: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TriageReportRow {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub payload: Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeploymentEventRow {
    pub id: Uuid,
    pub service: String,
    pub env: String,
    pub deployed_at: DateTime<Utc>,
    pub version: Option<String>,
    pub git_sha: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigChangeRow {
    pub id: Uuid,
    pub service: String,
    pub env: String,
    pub changed_at: DateTime<Utc>,
    pub actor: Option<String>,
    pub diff: Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedbackRow {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub helpful: Option<bool>,
    pub correct: Option<bool>,
    pub final_rca: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRunRow {
    pub id: Uuid,
    pub incident_id: Option<Uuid>,
    pub stage: String,
    pub status: String,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub metrics: Value,
    pub created_at: DateTime<Utc>,
}

// ─── Alert events ─────────────────────────────────────────────────────────────

pub async fn insert_alert_event(
    conn: &mut PgConnection,
    event: &AlertEvent,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO alert_events
           (id, source, external_id, title, severity, state, correlation_id,
            fired_at, ended_at, labels, annotations, resource_refs, raw_payload)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
    )
    .bind(id)
    .bind(event.source.to_string())
    .bind(&event.external_id)
    .bind(&event.title)
    .bind(&event.severity)
    .bind(&event.state)
    .bind(&event.correlation_id)
    .bind(event.fired_at)
    .bind(event.ended_at)
    .bind(serde_json::to_value(&event.labels).unwrap_or_default())
    .bind(serde_json::to_value(&event.annotations).unwrap_or_default())
    .bind(serde_json::to_value(&event.resource_refs).unwrap_or_default())
    .bind(&event.raw_payload)
    .execute(conn)
    .await?;
    Ok(id)
}

pub async fn get_alert_event(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<AlertEventRow>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM alert_events WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await
}

// ─── Incidents ────────────────────────────────────────────────────────────────

/// Upsert the incident for a dedup key:
/// - new key: insert in `open`
/// - existing key: point at the new alert event, fill `correlation_id` if
///   previously empty, and reopen to `open` (clearing `last_error`) when the
///   current status is in the reopen set.
pub async fn upsert_incident(
    conn: &mut PgConnection,
    dedup_key: &str,
    service: &str,
    env: &str,
    alert_event_id: Uuid,
    correlation_id: Option<&str>,
) -> Result<IncidentRow, sqlx::Error> {
    let inserted: Option<IncidentRow> = sqlx::query_as(
        r#"INSERT INTO incidents (id, dedup_key, service, env, status, latest_alert_event_id, correlation_id)
           VALUES ($1, $2, $3, $4, 'open', $5, $6)
           ON CONFLICT (dedup_key) DO NOTHING
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(dedup_key)
    .bind(service)
    .bind(env)
    .bind(alert_event_id)
    .bind(correlation_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(incident) = inserted {
        return Ok(incident);
    }

    // Existing incident; the unique column makes the race above harmless.
    let existing: IncidentRow = sqlx::query_as("SELECT * FROM incidents WHERE dedup_key = $1")
        .bind(dedup_key)
        .fetch_one(&mut *conn)
        .await?;

    let reopen = existing.status().reopens_on_new_alert();
    let updated: IncidentRow = sqlx::query_as(
        r#"UPDATE incidents
           SET latest_alert_event_id = $2,
               correlation_id = COALESCE(correlation_id, $3),
               status = CASE WHEN $4 THEN 'open' ELSE status END,
               last_error = CASE WHEN $4 THEN NULL ELSE last_error END,
               updated_at = NOW()
           WHERE id = $1
           RETURNING *"#,
    )
    .bind(existing.id)
    .bind(alert_event_id)
    .bind(correlation_id)
    .bind(reopen)
    .fetch_one(conn)
    .await?;
    Ok(updated)
}

pub async fn get_incident(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<IncidentRow>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM incidents WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn list_incidents(conn: &mut PgConnection) -> Result<Vec<IncidentRow>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM incidents ORDER BY updated_at DESC")
        .fetch_all(conn)
        .await
}

pub async fn set_incident_status(
    conn: &mut PgConnection,
    incident_id: Uuid,
    status: IncidentStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE incidents SET status = $2, last_error = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(incident_id)
    .bind(status.as_str())
    .bind(error)
    .execute(conn)
    .await?;
    Ok(())
}

/// Attach deploy context without ever overwriting with null.
pub async fn attach_incident_version(
    conn: &mut PgConnection,
    incident_id: Uuid,
    version: Option<&str>,
    git_sha: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE incidents
           SET service_version = COALESCE($2, service_version),
               git_sha = COALESCE($3, git_sha),
               updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(incident_id)
    .bind(version)
    .bind(git_sha)
    .execute(conn)
    .await?;
    Ok(())
}

// ─── Evidence packs & reports ─────────────────────────────────────────────────

pub async fn store_evidence_pack(
    conn: &mut PgConnection,
    incident_id: Uuid,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    artifacts: &Value,
    provenance: &Value,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO evidence_packs
           (id, incident_id, time_window_start, time_window_end, artifacts, provenance)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(id)
    .bind(incident_id)
    .bind(window_start)
    .bind(window_end)
    .bind(artifacts)
    .bind(provenance)
    .execute(conn)
    .await?;
    Ok(id)
}

/// Most-recent pack by `created_at` is "current".
pub async fn latest_evidence_pack(
    conn: &mut PgConnection,
    incident_id: Uuid,
) -> Result<Option<EvidencePackRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM evidence_packs WHERE incident_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(incident_id)
    .fetch_optional(conn)
    .await
}

/// One report per incident; re-runs overwrite.
pub async fn store_triage_report(
    conn: &mut PgConnection,
    incident_id: Uuid,
    model: &str,
    payload: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO triage_reports (id, incident_id, generated_at, model, payload)
           VALUES ($1, $2, NOW(), $3, $4)
           ON CONFLICT (incident_id)
           DO UPDATE SET generated_at = NOW(), model = $3, payload = $4"#,
    )
    .bind(Uuid::new_v4())
    .bind(incident_id)
    .bind(model)
    .bind(payload)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_triage_report(
    conn: &mut PgConnection,
    incident_id: Uuid,
) -> Result<Option<TriageReportRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, incident_id, generated_at, model, payload FROM triage_reports WHERE incident_id = $1",
    )
    .bind(incident_id)
    .fetch_optional(conn)
    .await
}

// ─── Review decisions & feedback ──────────────────────────────────────────────

pub async fn create_review_decision(
    conn: &mut PgConnection,
    incident_id: Uuid,
    decision: ReviewDecisionKind,
    notes: Option<&str>,
    decided_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO review_decisions (id, incident_id, decision, notes, decided_by)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(Uuid::new_v4())
    .bind(incident_id)
    .bind(decision.as_str())
    .bind(notes)
    .bind(decided_by)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn create_feedback(
    conn: &mut PgConnection,
    incident_id: Uuid,
    helpful: Option<bool>,
    correct: Option<bool>,
    final_rca: Option<&str>,
    notes: Option<&str>,
    created_by: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO incident_feedback (id, incident_id, helpful, correct, final_rca, notes, created_by)
           VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
    )
    .bind(id)
    .bind(incident_id)
    .bind(helpful)
    .bind(correct)
    .bind(final_rca)
    .bind(notes)
    .bind(created_by)
    .execute(conn)
    .await?;
    Ok(id)
}

pub async fn list_feedback(
    conn: &mut PgConnection,
    incident_id: Uuid,
) -> Result<Vec<FeedbackRow>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, incident_id, helpful, correct, final_rca, notes, created_by, created_at
           FROM incident_feedback WHERE incident_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(incident_id)
    .fetch_all(conn)
    .await
}

// ─── Change events ────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn insert_deployment_event(
    conn: &mut PgConnection,
    service: &str,
    env: &str,
    deployed_at: DateTime<Utc>,
    version: Option<&str>,
    git_sha: Option<&str>,
    actor: Option<&str>,
    source: Option<&str>,
    metadata: &Value,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO deployment_events (id, service, env, deployed_at, version, git_sha, actor, source, metadata)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
    )
    .bind(id)
    .bind(service)
    .bind(env)
    .bind(deployed_at)
    .bind(version)
    .bind(git_sha)
    .bind(actor)
    .bind(source)
    .bind(metadata)
    .execute(conn)
    .await?;
    Ok(id)
}

pub async fn insert_config_change(
    conn: &mut PgConnection,
    service: &str,
    env: &str,
    changed_at: DateTime<Utc>,
    actor: Option<&str>,
    diff: &Value,
    source: Option<&str>,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO config_changes (id, service, env, changed_at, actor, diff, source)
           VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
    )
    .bind(id)
    .bind(service)
    .bind(env)
    .bind(changed_at)
    .bind(actor)
    .bind(diff)
    .bind(source)
    .execute(conn)
    .await?;
    Ok(id)
}

/// Deployments for `(service, env)` inside a window, newest first.
pub async fn list_recent_deployments(
    conn: &mut PgConnection,
    service: &str,
    env: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<DeploymentEventRow>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, service, env, deployed_at, version, git_sha, actor
           FROM deployment_events
           WHERE service = $1 AND env = $2 AND deployed_at >= $3 AND deployed_at <= $4
           ORDER BY deployed_at DESC"#,
    )
    .bind(service)
    .bind(env)
    .bind(since)
    .bind(until)
    .fetch_all(conn)
    .await
}

pub async fn list_recent_config_changes(
    conn: &mut PgConnection,
    service: &str,
    env: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<ConfigChangeRow>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, service, env, changed_at, actor, diff
           FROM config_changes
           WHERE service = $1 AND env = $2 AND changed_at >= $3 AND changed_at <= $4
           ORDER BY changed_at DESC"#,
    )
    .bind(service)
    .bind(env)
    .bind(since)
    .bind(until)
    .fetch_all(conn)
    .await
}

// ─── Audit & pipeline telemetry ───────────────────────────────────────────────

pub async fn create_audit_log(
    conn: &mut PgConnection,
    actor: &str,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    details: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO audit_logs (id, actor, action, resource_type, resource_id, details)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(Uuid::new_v4())
    .bind(actor)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(details)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn create_pipeline_run(
    conn: &mut PgConnection,
    incident_id: Option<Uuid>,
    stage: &str,
    status: &str,
    duration_ms: i64,
    error: Option<&str>,
    metrics: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO pipeline_runs (id, incident_id, stage, status, duration_ms, error, metrics)
           VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
    )
    .bind(Uuid::new_v4())
    .bind(incident_id)
    .bind(stage)
    .bind(status)
    .bind(duration_ms)
    .bind(error)
    .bind(metrics)
    .execute(conn)
    .await?;
    Ok(())
}

/// All pipeline runs for one incident, newest first.
pub async fn list_pipeline_runs(
    conn: &mut PgConnection,
    incident_id: Uuid,
) -> Result<Vec<PipelineRunRow>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, incident_id, stage, status, duration_ms, error, metrics, created_at
           FROM pipeline_runs WHERE incident_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(incident_id)
    .fetch_all(conn)
    .await
}

// ─── Metrics aggregates ───────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct QualityMetrics {
    pub total_incidents: i64,
    pub status_counts: BTreeMap<String, i64>,
    pub decisions_total: i64,
    pub approvals: i64,
    pub rejections: i64,
    pub review_acceptance_rate: Option<f64>,
    pub avg_lifecycle_seconds: Option<f64>,
}

pub async fn quality_metrics(conn: &mut PgConnection) -> Result<QualityMetrics, sqlx::Error> {
    let status_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM incidents GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;
    let status_counts: BTreeMap<String, i64> = status_rows.into_iter().collect();
    let total_incidents = status_counts.values().sum();

    let decision_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT decision, COUNT(*) FROM review_decisions GROUP BY decision")
            .fetch_all(&mut *conn)
            .await?;
    let mut approvals = 0;
    let mut rejections = 0;
    for (decision, count) in decision_rows {
        match decision.as_str() {
            "approve" => approvals = count,
            "reject" => rejections = count,
            _ => {}
        }
    }
    let decisions_total = approvals + rejections;
    let review_acceptance_rate =
        (decisions_total > 0).then(|| approvals as f64 / decisions_total as f64);

    let avg_lifecycle_seconds: Option<f64> = sqlx::query_scalar(
        r#"SELECT AVG(EXTRACT(EPOCH FROM (updated_at - created_at)))::float8
           FROM incidents
           WHERE status IN ('triaged', 'mitigated', 'resolved', 'postmortem_required')"#,
    )
    .fetch_one(conn)
    .await?;

    Ok(QualityMetrics {
        total_incidents,
        status_counts,
        decisions_total,
        approvals,
        rejections,
        review_acceptance_rate,
        avg_lifecycle_seconds,
    })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeMetrics {
    pub total_runs: i64,
    pub status_counts: BTreeMap<String, i64>,
    pub failures: i64,
    pub avg_duration_ms: Option<f64>,
    pub recent_runs: Vec<Value>,
}

pub async fn runtime_metrics(conn: &mut PgConnection) -> Result<RuntimeMetrics, sqlx::Error> {
    let status_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM pipeline_runs GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;
    let status_counts: BTreeMap<String, i64> = status_rows.into_iter().collect();
    let total_runs = status_counts.values().sum();
    let failures = status_counts.get("failed").copied().unwrap_or(0);

    let avg_duration_ms: Option<f64> =
        sqlx::query_scalar("SELECT AVG(duration_ms)::float8 FROM pipeline_runs")
            .fetch_one(&mut *conn)
            .await?;

    let recent: Vec<PipelineRunRow> = sqlx::query_as(
        r#"SELECT id, incident_id, stage, status, duration_ms, error, metrics, created_at
           FROM pipeline_runs ORDER BY created_at DESC LIMIT 20"#,
    )
    .fetch_all(conn)
    .await?;
    let recent_runs = recent
        .into_iter()
        .map(|run| {
            serde_json::json!({
                "id": run.id,
                "incident_id": run.incident_id,
                "stage": run.stage,
                "status": run.status,
                "duration_ms": run.duration_ms,
                "error": run.error,
                "metrics": run.metrics,
                "created_at": run.created_at,
            })
        })
        .collect();

    Ok(RuntimeMetrics {
        total_runs,
        status_counts,
        failures,
        avg_duration_ms,
        recent_runs,
    })
}

// ─── Retention ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PurgeSummary {
    pub pipeline_runs: u64,
    pub audit_logs: u64,
    pub triage_jobs: u64,
    pub evidence_packs: u64,
    pub triage_reports: u64,
    pub review_decisions: u64,
    pub feedback: u64,
    pub deployment_events: u64,
    pub config_changes: u64,
    pub incidents: u64,
    pub alert_events: u64,
}

/// Delete records older than the cutoff, children before parents.
pub async fn purge_older_than(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> Result<PurgeSummary, sqlx::Error> {
    let mut summary = PurgeSummary::default();

    summary.pipeline_runs = sqlx::query("DELETE FROM pipeline_runs WHERE created_at < $1")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    summary.audit_logs = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    summary.triage_jobs = sqlx::query("DELETE FROM triage_jobs WHERE created_at < $1")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let stale_incidents = "SELECT id FROM incidents WHERE updated_at < $1";
    summary.evidence_packs = sqlx::query(&format!(
        "DELETE FROM evidence_packs WHERE incident_id IN ({stale_incidents})"
    ))
    .bind(cutoff)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    summary.triage_reports = sqlx::query(&format!(
        "DELETE FROM triage_reports WHERE incident_id IN ({stale_incidents})"
    ))
    .bind(cutoff)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    summary.review_decisions = sqlx::query(&format!(
        "DELETE FROM review_decisions WHERE incident_id IN ({stale_incidents})"
    ))
    .bind(cutoff)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    summary.feedback = sqlx::query(&format!(
        "DELETE FROM incident_feedback WHERE incident_id IN ({stale_incidents})"
    ))
    .bind(cutoff)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    summary.deployment_events =
        sqlx::query("DELETE FROM deployment_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    summary.config_changes = sqlx::query("DELETE FROM config_changes WHERE created_at < $1")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    summary.incidents = sqlx::query("DELETE FROM incidents WHERE updated_at < $1")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    summary.alert_events = sqlx::query(
        r#"DELETE FROM alert_events
           WHERE created_at < $1
             AND id NOT IN (
                SELECT latest_alert_event_id FROM incidents
                WHERE latest_alert_event_id IS NOT NULL
             )"#,
    )
    .bind(cutoff)
    .execute(conn)
    .await?
    .rows_affected();

    Ok(summary)
}

/// Window cutoff helper for retention.
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_cutoff_clamps_negative_days() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, -5), now);
        assert_eq!(retention_cutoff(now, 30), now - Duration::days(30));
    }

    #[test]
    fn test_incident_row_status_parse() {
        let row = IncidentRow {
            id: Uuid::new_v4(),
            dedup_key: "k".into(),
            service: "svc".into(),
            env: "prod".into(),
            service_version: None,
            git_sha: None,
            correlation_id: None,
            status: "awaiting_human_review".into(),
            latest_alert_event_id: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.status(), IncidentStatus::AwaitingHumanReview);
    }
}
