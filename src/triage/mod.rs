//! Per-incident triage runner.
//!
//! Drives one incident through evidence gathering, the no-guess gate, LLM
//! generation, validation, and persistence. Failures are recorded on the
//! incident and as a failed pipeline run before they propagate to the worker
//! harness, which retries with backoff; the idempotence gate makes a retry
//! after a completed run a no-op skip.

pub mod evidence;
pub mod queue;
pub mod scoring;

use crate::adapters::llm::LlmError;
use crate::error::TriageError;
use crate::redaction::redact_value;
use crate::storage::repository;
use crate::triage::evidence::{artifact_ids, build_evidence, compute_window, estimate_cost};
use crate::triage::scoring::EvidenceScore;
use crate::types::{report_json_schema, IncidentStatus, TriageReportPayload};
use crate::AppState;
use chrono::Utc;
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Model name recorded for synthesized no-guess reports.
const FALLBACK_MODEL: &str = "fallback:no-guess";

/// Run triage for one incident. Missing incidents return silently; every
/// other failure is recorded (incident `failed`, failed pipeline run) and
/// then returned so the worker harness can retry.
pub async fn run_triage(state: &AppState, incident_id: Uuid) -> Result<(), TriageError> {
    let run_start = Instant::now();
    match triage_inner(state, incident_id, run_start).await {
        Ok(()) => Ok(()),
        Err(error) => {
            record_failure(state, incident_id, &error, run_start).await;
            state
                .notifier
                .notify(&format!("triage failed: {error}"))
                .await;
            Err(error)
        }
    }
}

async fn triage_inner(
    state: &AppState,
    incident_id: Uuid,
    run_start: Instant,
) -> Result<(), TriageError> {
    let settings = &state.settings;

    // Load; a vanished incident is not an error.
    let mut conn = state.db.acquire().await?;
    let Some(incident) = repository::get_incident(&mut conn, incident_id).await? else {
        return Ok(());
    };

    // Transition to triaging in its own transaction.
    let mut tx = state.db.begin().await?;
    repository::set_incident_status(&mut tx, incident_id, IncidentStatus::Triaging, None).await?;
    tx.commit().await?;

    let alert_event_id = incident
        .latest_alert_event_id
        .ok_or_else(|| TriageError::Other("incident missing latest alert".to_string()))?;
    let alert = repository::get_alert_event(&mut conn, alert_event_id)
        .await?
        .ok_or_else(|| TriageError::Other("incident missing latest alert".to_string()))?;

    // Idempotence gate: a pack generated for this exact alert means a prior
    // run completed; repeat deliveries become no-op skips.
    if let Some(pack) = repository::latest_evidence_pack(&mut conn, incident_id).await? {
        let pack_alert = pack
            .provenance
            .get("alert_event_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if pack_alert == alert.id.to_string() {
            let mut tx = state.db.begin().await?;
            repository::create_pipeline_run(
                &mut tx,
                Some(incident_id),
                "triage",
                "skipped",
                run_start.elapsed().as_millis() as i64,
                None,
                &serde_json::json!({"reason": "idempotent-skip"}),
            )
            .await?;
            tx.commit().await?;
            info!(incident_id = %incident_id, "Triage skipped (idempotent)");
            return Ok(());
        }
    }

    let registry_key = alert
        .resource_ref("alarm_name")
        .unwrap_or_else(|| incident.service.clone());
    let registry_entry = state.registry.resolve(&registry_key);

    let correlation_id = alert
        .correlation_id
        .clone()
        .or_else(|| incident.correlation_id.clone());
    let window = compute_window(
        alert.fired_at,
        correlation_id.is_some(),
        &alert.severity,
        settings.triage_window_minutes,
    );

    // Correlate change events; attach deploy context non-destructively.
    let recent_deploys = repository::list_recent_deployments(
        &mut conn,
        &incident.service,
        &incident.env,
        window.start,
        window.end,
    )
    .await?;
    let recent_config = repository::list_recent_config_changes(
        &mut conn,
        &incident.service,
        &incident.env,
        window.start,
        window.end,
    )
    .await?;
    if let Some(deploy) = recent_deploys.first() {
        repository::attach_incident_version(
            &mut conn,
            incident_id,
            deploy.version.as_deref(),
            deploy.git_sha.as_deref(),
        )
        .await?;
    }
    // Release the connection before the outbound evidence calls.
    drop(conn);

    let incident = repository::get_incident(&mut *state.db.acquire().await?, incident_id)
        .await?
        .ok_or_else(|| TriageError::Other("incident vanished mid-run".to_string()))?;

    let bundle = build_evidence(
        settings,
        &alert,
        &incident,
        &registry_entry,
        &state.query_library,
        state.logs.as_ref(),
        &state.repo_fetcher,
        &window,
        &recent_deploys,
        &recent_config,
    )
    .await
    .map_err(|e| TriageError::Transport(e.to_string()))?;

    let cost = estimate_cost(&bundle.digest);

    // No-guess gate: fixture mode clamps the threshold and relaxes the
    // required query-ref count to what the run could actually produce.
    let mut threshold = settings.no_guess_confidence_threshold;
    if settings.fixture_mode {
        threshold = threshold.min(0.6);
    }
    let mut no_guess = bundle.score.score < threshold;
    let mut no_guess_reasons = Vec::new();
    if no_guess {
        no_guess_reasons.push(format!(
            "score_below_threshold:{}<{}",
            bundle.score.score, threshold
        ));
    }
    let mut required_query_refs = settings.evidence_min_refs_for_confident_report;
    if settings.fixture_mode {
        required_query_refs = required_query_refs.saturating_sub(1).max(1);
        required_query_refs = required_query_refs.min(bundle.executed_query_count.max(1));
    }
    if bundle.query_artifact_count < required_query_refs {
        no_guess = true;
        no_guess_reasons.push(format!(
            "insufficient_query_refs:{}<{}",
            bundle.query_artifact_count, required_query_refs
        ));
    }

    let (payload, model_name, llm_meta) = if no_guess {
        let payload = fallback_insufficient_report(&bundle.artifacts, &bundle.score);
        let meta = serde_json::json!({
            "llm_provider": "fallback",
            "llm_endpoint_used": null,
            "endpoint_failover_count": 0,
        });
        (payload, FALLBACK_MODEL.to_string(), meta)
    } else {
        let redacted_digest = redact_value(&bundle.digest);
        let mut tx = state.db.begin().await?;
        repository::create_audit_log(
            &mut tx,
            "system",
            "llm.generate",
            "incident",
            Some(&incident_id.to_string()),
            &serde_json::json!({"model": state.llm.model_name()}),
        )
        .await?;
        tx.commit().await?;

        let schema = report_json_schema();
        let reply = state
            .llm
            .generate(&redacted_digest, &schema)
            .await
            .map_err(|e| match e {
                LlmError::Configuration(inner) => TriageError::LlmConfiguration(inner),
                LlmError::Transport(message) => TriageError::Transport(message),
                LlmError::InvalidResponse(message) => TriageError::Other(message),
            })?;

        let meta = serde_json::to_value(&reply.metadata).unwrap_or_default();
        let mut payload = reply.payload;
        merge_generation_metadata(&mut payload, &meta);
        (payload, state.llm.model_name().to_string(), meta)
    };

    // Validate against the report schema and citation discipline.
    let known = artifact_ids(&bundle.artifacts);
    let validated: TriageReportPayload = serde_json::from_value(payload.clone())
        .map_err(|e| TriageError::ReportValidation(e.to_string()))?;
    validated
        .validate(Some(&known))
        .map_err(TriageError::ReportValidation)?;
    let payload = serde_json::to_value(&validated)
        .map_err(|e| TriageError::ReportValidation(e.to_string()))?;

    // Persist report, pack, transition, and telemetry atomically.
    let artifacts_value = if settings.allow_raw_storage || settings.fixture_mode {
        Value::Array(bundle.artifacts.clone())
    } else {
        redact_value(&Value::Array(bundle.artifacts.clone()))
    };
    let provenance = serde_json::json!({
        "generated_at": Utc::now().to_rfc3339(),
        "window_reason": window.reason,
        "query_names": bundle.query_names,
        "correlation_id": bundle.correlation_id,
        "alert_event_id": alert.id.to_string(),
        "evidence_score": bundle.score.clone(),
        "no_guess_mode": no_guess,
        "no_guess_reasons": no_guess_reasons,
        "effective_confidence_threshold": threshold,
        "required_query_refs": required_query_refs,
        "query_artifact_count": bundle.query_artifact_count,
        "cost_estimate": cost,
    });
    let mut metrics = serde_json::json!({
        "score": bundle.score.score,
        "no_guess_mode": no_guess,
        "no_guess_reasons": provenance["no_guess_reasons"],
        "effective_confidence_threshold": threshold,
        "required_query_refs": required_query_refs,
        "query_artifact_count": bundle.query_artifact_count,
    });
    if let (Some(metrics_map), Some(cost_map), Some(meta_map)) = (
        metrics.as_object_mut(),
        cost.as_object(),
        llm_meta.as_object(),
    ) {
        for (key, value) in cost_map.iter().chain(meta_map.iter()) {
            metrics_map.insert(key.clone(), value.clone());
        }
    }

    let mut tx = state.db.begin().await?;
    repository::store_triage_report(&mut tx, incident_id, &model_name, &payload).await?;
    repository::set_incident_status(
        &mut tx,
        incident_id,
        IncidentStatus::AwaitingHumanReview,
        None,
    )
    .await?;
    repository::store_evidence_pack(
        &mut tx,
        incident_id,
        window.start,
        window.end,
        &artifacts_value,
        &provenance,
    )
    .await?;
    repository::create_pipeline_run(
        &mut tx,
        Some(incident_id),
        "triage",
        "success",
        run_start.elapsed().as_millis() as i64,
        None,
        &metrics,
    )
    .await?;
    tx.commit().await?;

    info!(
        incident_id = %incident_id,
        score = bundle.score.score,
        no_guess = no_guess,
        "Triage complete"
    );
    state
        .notifier
        .notify_incident_update(
            &incident_id.to_string(),
            &incident.service,
            &incident.env,
            IncidentStatus::AwaitingHumanReview.as_str(),
            &registry_entry.owners,
            &registry_entry.runbook_url,
            &registry_entry.dashboard_url,
            Some(&format!(
                "score={} no_guess={}",
                bundle.score.score, no_guess
            )),
        )
        .await;
    Ok(())
}

/// Best-effort failure bookkeeping: incident to `failed` with the error, and
/// a failed pipeline run on the stage the taxonomy assigns.
async fn record_failure(
    state: &AppState,
    incident_id: Uuid,
    error: &TriageError,
    run_start: Instant,
) {
    let result: Result<(), sqlx::Error> = async {
        let mut tx = state.db.begin().await?;
        if repository::get_incident(&mut tx, incident_id).await?.is_some() {
            repository::set_incident_status(
                &mut tx,
                incident_id,
                IncidentStatus::Failed,
                Some(&error.to_string()),
            )
            .await?;
            repository::create_pipeline_run(
                &mut tx,
                Some(incident_id),
                error.stage(),
                "failed",
                run_start.elapsed().as_millis() as i64,
                Some(&error.to_string()),
                &serde_json::json!({}),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
    .await;

    if let Err(db_error) = result {
        warn!(
            incident_id = %incident_id,
            error = %db_error,
            "Failed to record triage failure"
        );
    }
}

fn merge_generation_metadata(payload: &mut Value, meta: &Value) {
    let Some(map) = payload.as_object_mut() else {
        return;
    };
    let merged = match (map.get("generation_metadata"), meta.as_object()) {
        (Some(Value::Object(existing)), Some(incoming)) => {
            let mut merged = existing.clone();
            for (key, value) in incoming {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => meta.clone(),
    };
    map.insert("generation_metadata".to_string(), merged);
}

/// Synthesized report for no-guess mode: no facts or hypotheses, two
/// standard next checks citing the first two logs-query artifacts. When the
/// run executed no queries, the always-present evidence-score artifact is
/// cited instead so the report stays citation-complete.
fn fallback_insufficient_report(artifacts: &[Value], score: &EvidenceScore) -> Value {
    let mut query_refs: Vec<Value> = artifacts
        .iter()
        .filter(|a| a.get("type").and_then(Value::as_str) == Some("logs_query"))
        .take(2)
        .map(|a| {
            serde_json::json!({
                "artifact_id": a.get("artifact_id"),
                "pointer": format!(
                    "query_id:{}",
                    a.get("query_id").and_then(Value::as_str).unwrap_or("unknown")
                ),
            })
        })
        .collect();
    if query_refs.is_empty() {
        let citable = artifacts
            .iter()
            .find(|a| a.get("type").and_then(Value::as_str) == Some("evidence_score"))
            .or_else(|| artifacts.first());
        if let Some(artifact) = citable {
            query_refs.push(serde_json::json!({
                "artifact_id": artifact.get("artifact_id"),
                "pointer": "evidence_score",
            }));
        }
    }

    serde_json::json!({
        "summary": "Insufficient evidence for a confident root-cause statement.",
        "mode": "insufficient_evidence",
        "facts": [],
        "hypotheses": [],
        "next_checks": [
            {
                "check_id": "check-collect-more-logs",
                "step": "Expand log window and validate whether error signatures persist.",
                "command_or_query": "rerun errors and patterns queries with broader interval",
                "evidence_refs": query_refs,
            },
            {
                "check_id": "check-deploy-diff",
                "step": "Compare deployed version against last known healthy release.",
                "command_or_query": "inspect deployment timeline and diff config changes",
                "evidence_refs": query_refs,
            },
        ],
        "mitigations": [],
        "claims": [
            {
                "claim_id": "claim-insufficient-evidence",
                "type": "next_check",
                "text": "Current evidence does not support a reliable root-cause hypothesis.",
                "evidence_refs": query_refs,
            },
        ],
        "uncertainty_note": format!("evidence_score={} ({})", score.score, score.level),
        "generation_metadata": {
            "llm_provider": "fallback",
            "llm_endpoint_used": null,
            "endpoint_failover_count": 0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::evidence::artifact;

    fn sample_score() -> EvidenceScore {
        EvidenceScore {
            score: 0.2,
            level: "low".to_string(),
            reasons: vec!["fixture mode confidence penalty".to_string()],
        }
    }

    #[test]
    fn test_fallback_report_cites_query_artifacts() {
        let artifacts = vec![
            artifact("log_signatures", serde_json::json!({"signatures": []})),
            artifact(
                "logs_query",
                serde_json::json!({"query_name": "errors", "query_id": "q-1"}),
            ),
            artifact(
                "logs_query",
                serde_json::json!({"query_name": "patterns", "query_id": "q-2"}),
            ),
            artifact(
                "logs_query",
                serde_json::json!({"query_name": "latency", "query_id": "q-3"}),
            ),
        ];
        let report = fallback_insufficient_report(&artifacts, &sample_score());
        assert_eq!(report["mode"], "insufficient_evidence");
        let refs = report["next_checks"][0]["evidence_refs"]
            .as_array()
            .expect("refs");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0]["pointer"], "query_id:q-1");
        assert_eq!(report["generation_metadata"]["llm_provider"], "fallback");
        assert!(report["uncertainty_note"]
            .as_str()
            .expect("note")
            .contains("0.2"));

        // The synthesized report must satisfy the stored-report schema.
        let parsed: TriageReportPayload =
            serde_json::from_value(report).expect("fallback matches schema");
        let known = artifact_ids(&artifacts);
        parsed.validate(Some(&known)).expect("fallback refs resolve");
        assert!(parsed.facts.is_empty());
        assert_eq!(parsed.next_checks.len(), 2);
    }

    #[test]
    fn test_fallback_report_without_query_artifacts_cites_score() {
        let artifacts = vec![
            artifact("log_signatures", serde_json::json!({"signatures": []})),
            artifact(
                "evidence_score",
                serde_json::json!({"score": 0.2, "level": "low", "reasons": []}),
            ),
        ];
        let score_artifact_id = artifacts[1]["artifact_id"]
            .as_str()
            .expect("score artifact id")
            .to_string();

        let report = fallback_insufficient_report(&artifacts, &sample_score());
        let parsed: TriageReportPayload =
            serde_json::from_value(report).expect("fallback matches schema");
        let known = artifact_ids(&artifacts);
        parsed
            .validate(Some(&known))
            .expect("fallback stays citation-complete");
        assert_eq!(
            parsed.next_checks[0].evidence_refs[0].artifact_id,
            score_artifact_id
        );
        assert_eq!(parsed.claims[0].evidence_refs[0].artifact_id, score_artifact_id);
    }

    #[test]
    fn test_merge_generation_metadata_overrides() {
        let mut payload = serde_json::json!({
            "generation_metadata": {"llm_provider": "model-claimed", "extra": true},
        });
        let meta = serde_json::json!({
            "llm_provider": "local",
            "llm_endpoint_used": "http://ollama-2:11434",
            "endpoint_failover_count": 1,
        });
        merge_generation_metadata(&mut payload, &meta);
        assert_eq!(payload["generation_metadata"]["llm_provider"], "local");
        assert_eq!(payload["generation_metadata"]["extra"], true);
        assert_eq!(
            payload["generation_metadata"]["endpoint_failover_count"],
            1
        );
    }
}
