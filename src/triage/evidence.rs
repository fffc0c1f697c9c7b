//! Evidence assembly: windowing, log-pattern mining, stack-frame mapping,
//! timeline correlation, and the LLM digest.

use crate::adapters::repo::RepoSnippetFetcher;
use crate::adapters::LogsFetcher;
use crate::config::Settings;
use crate::hashing::{artifact_id_for, canonical_json};
use crate::query_library::QueryLibrary;
use crate::registry::RegistryEntry;
use crate::storage::repository::{AlertEventRow, ConfigChangeRow, DeploymentEventRow, IncidentRow};
use crate::triage::scoring::{score_evidence, EvidenceScore, ScoreInputs};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

// ─── Window ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TriageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: String,
}

/// Symmetric window around the alert. Correlation ids narrow it, critical
/// severity widens it, and the radius never drops below five minutes.
pub fn compute_window(
    fired_at: DateTime<Utc>,
    has_correlation_id: bool,
    severity: &str,
    base_minutes: i64,
) -> TriageWindow {
    let (multiplier, reason) = if has_correlation_id {
        (0.8, "narrowed-window-correlation-id")
    } else if matches!(severity.to_lowercase().as_str(), "critical" | "high") {
        (1.5, "expanded-window-critical")
    } else {
        (1.0, "default-window")
    };
    let minutes = ((base_minutes as f64 * multiplier) as i64).max(5);
    TriageWindow {
        start: fired_at - Duration::minutes(minutes),
        end: fired_at + Duration::minutes(minutes),
        reason: reason.to_string(),
    }
}

// ─── Pattern mining ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogPattern {
    pub signature_id: String,
    pub count: usize,
    pub pattern: String,
    pub samples: Vec<String>,
}

/// Rank log lines by their first-180-char normalization; top 8 by count,
/// first-seen order breaking ties, with up to three sample lines each.
pub fn patterns_from_lines(lines: &[String]) -> Vec<LogPattern> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut samples: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();

    for line in lines {
        let normalized: String = line.chars().take(180).collect();
        if !counts.contains_key(&normalized) {
            order.push(normalized.clone());
        }
        *counts.entry(normalized.clone()).or_insert(0) += 1;
        let bucket = samples.entry(normalized).or_default();
        if bucket.len() < 3 {
            bucket.push(line.clone());
        }
    }

    let mut ranked: Vec<(usize, String)> = order
        .into_iter()
        .enumerate()
        .map(|(index, pattern)| (index, pattern))
        .collect();
    ranked.sort_by(|(ia, pa), (ib, pb)| {
        counts[pb].cmp(&counts[pa]).then(ia.cmp(ib))
    });

    ranked
        .into_iter()
        .take(8)
        .map(|(_, pattern)| LogPattern {
            signature_id: crate::hashing::stable_hash(&pattern)[..12].to_string(),
            count: counts[&pattern],
            samples: samples.remove(&pattern).unwrap_or_default(),
            pattern,
        })
        .collect()
}

fn frame_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("valid regex"))
}

/// Extract up to five `(basename, line)` stack frames from traceback lines.
pub fn extract_stack_frames(lines: &[String]) -> Vec<(String, usize)> {
    let mut frames = Vec::new();
    for line in lines {
        if let Some(caps) = frame_pattern().captures(line) {
            let path = &caps[1];
            if let Ok(line_no) = caps[2].parse::<usize>() {
                if path.contains('/') {
                    if let Some(basename) = path.rsplit('/').next() {
                        frames.push((basename.to_string(), line_no));
                    }
                }
            }
        }
        if frames.len() >= 5 {
            break;
        }
    }
    frames
}

/// Escape a correlation id for use inside a Logs Insights `like //` clause.
pub fn escape_logs_regex(value: &str) -> String {
    regex::escape(value).replace('/', "\\/")
}

// ─── Artifacts ────────────────────────────────────────────────────────────────

/// Tag a payload with its type and stable artifact id.
pub fn artifact(artifact_type: &str, payload: Value) -> Value {
    let artifact_id = artifact_id_for(artifact_type, &payload);
    let mut object = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    object.insert("artifact_id".to_string(), Value::String(artifact_id));
    object.insert("type".to_string(), Value::String(artifact_type.to_string()));
    Value::Object(object)
}

/// Truncate every string inside a JSON value to `max_chars`.
pub fn truncate_strings(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(text) if text.chars().count() > max_chars => {
            Value::String(text.chars().take(max_chars).collect())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| truncate_strings(item, max_chars))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_strings(v, max_chars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Artifact ids present in a built artifact list.
pub fn artifact_ids(artifacts: &[Value]) -> HashSet<String> {
    artifacts
        .iter()
        .filter_map(|a| a.get("artifact_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

// ─── Builder ──────────────────────────────────────────────────────────────────

/// Everything the runner needs from one evidence pass.
pub struct EvidenceBundle {
    pub artifacts: Vec<Value>,
    pub digest: Value,
    pub score: EvidenceScore,
    pub query_names: Vec<String>,
    pub executed_query_count: usize,
    pub query_artifact_count: usize,
    pub correlation_id: Option<String>,
}

/// Gather evidence for one incident. Runs lock-free: all inputs that need
/// the database are passed in, and no transaction is held across the
/// outbound log/repo calls made here.
#[allow(clippy::too_many_arguments)]
pub async fn build_evidence(
    settings: &Settings,
    alert: &AlertEventRow,
    incident: &IncidentRow,
    registry_entry: &RegistryEntry,
    query_library: &QueryLibrary,
    logs: &dyn LogsFetcher,
    repo_fetcher: &RepoSnippetFetcher,
    window: &TriageWindow,
    recent_deploys: &[DeploymentEventRow],
    recent_config: &[ConfigChangeRow],
) -> anyhow::Result<EvidenceBundle> {
    let correlation_id = alert
        .correlation_id
        .clone()
        .or_else(|| incident.correlation_id.clone());
    let alarm_name = alert.resource_ref("alarm_name");
    let log_group = registry_entry.primary_log_group().to_string();

    // Query set: library templates first, correlation grep last, capped.
    let mut queries = query_library.queries_for(alarm_name.as_deref());
    if let Some(correlation) = &correlation_id {
        queries.push((
            "correlation".to_string(),
            format!(
                "fields @timestamp, @message | filter @message like /{}/ | sort @timestamp desc | limit 200",
                escape_logs_regex(correlation)
            ),
        ));
    }
    queries.truncate(settings.max_logs_queries_per_incident);

    let mut query_results = Vec::with_capacity(queries.len());
    for (name, query) in &queries {
        let result = logs
            .fetch_logs(&log_group, window.start, window.end, query)
            .await?;
        query_results.push((name.clone(), query.clone(), result));
    }

    // Correlation-scoped lines lead so their signatures rank first on ties.
    let correlation_lines: Vec<String> = query_results
        .iter()
        .filter(|(name, _, _)| name == "correlation")
        .flat_map(|(_, _, result)| result.message_lines())
        .collect();
    let mut lines = correlation_lines.clone();
    for (name, _, result) in &query_results {
        if name != "correlation" {
            lines.extend(result.message_lines());
        }
    }
    if let Some(reason) = alert.annotation("reason") {
        let trimmed = reason.trim().to_string();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }

    let patterns = patterns_from_lines(&lines);
    let stack_frames = extract_stack_frames(&lines);

    // Stack-frame snippets, with keyword search as the fallback.
    let repo_path = resolve_repo_path(settings, &registry_entry.repo_local_path);
    let mut stack_snippets = Vec::new();
    for (basename, line_no) in &stack_frames {
        if let Some(snippet) = repo_fetcher
            .snippet_for_file_line(&repo_path, basename, *line_no, incident.git_sha.as_deref())
            .await
        {
            stack_snippets.push(snippet);
        }
    }
    let repo_snippets = if stack_snippets.is_empty() {
        let keywords: Vec<String> = patterns
            .iter()
            .filter_map(|p| p.pattern.split_whitespace().next())
            .filter(|token| token.len() > 3)
            .map(str::to_string)
            .collect();
        repo_fetcher
            .search_snippets(&repo_path, &keywords, settings.max_repo_snippets)
            .await
    } else {
        stack_snippets
    };
    let recent_commits = repo_fetcher
        .recent_commits(&repo_path, settings.repo_recent_commits_limit)
        .await;

    let score = score_evidence(&ScoreInputs {
        pattern_texts: &patterns
            .iter()
            .map(|p| p.pattern.clone())
            .collect::<Vec<_>>(),
        repo_snippet_count: repo_snippets.len(),
        executed_query_count: query_results.len(),
        correlation_line_count: correlation_lines.len(),
        has_correlation_id: correlation_id.is_some(),
        alert_state: &alert.state,
        alert_reason: alert.annotation("reason").as_deref(),
        fixture_mode: settings.fixture_mode,
    });

    // ── Artifact assembly ─────────────────────────────────────────────────
    let mut artifacts = Vec::new();
    artifacts.push(artifact(
        "log_signatures",
        serde_json::json!({"signatures": patterns}),
    ));
    for (name, query, result) in &query_results {
        artifacts.push(artifact(
            "logs_query",
            serde_json::json!({
                "query_name": name,
                "query_id": result
                    .query_id
                    .clone()
                    .unwrap_or_else(|| format!("fixture-{name}")),
                "log_group": log_group.clone(),
                "query_string": query,
                "start": window.start.to_rfc3339(),
                "end": window.end.to_rfc3339(),
                "status": "Complete",
            }),
        ));
    }
    if let Some(correlation) = &correlation_id {
        artifacts.push(artifact(
            "correlation",
            serde_json::json!({"correlation_id": correlation}),
        ));
    }
    for snippet in &repo_snippets {
        let mut payload = serde_json::to_value(snippet).unwrap_or_default();
        if let Some(map) = payload.as_object_mut() {
            map.remove("type");
        }
        artifacts.push(artifact("repo_snippet", payload));
    }
    artifacts.push(artifact(
        "change_context",
        serde_json::json!({
            "repo_path": repo_path,
            "branch": "main",
            "git_sha": incident.git_sha.clone(),
            "service_version": incident.service_version.clone(),
            "last_commits": recent_commits,
        }),
    ));
    artifacts.push(artifact(
        "deploy_timeline",
        serde_json::json!({
            "events": recent_deploys
                .iter()
                .map(|d| serde_json::json!({
                    "deployed_at": d.deployed_at.to_rfc3339(),
                    "version": d.version.clone(),
                    "git_sha": d.git_sha.clone(),
                    "actor": d.actor.clone(),
                }))
                .collect::<Vec<_>>(),
        }),
    ));
    artifacts.push(artifact(
        "config_changes",
        serde_json::json!({
            "events": recent_config
                .iter()
                .map(|c| serde_json::json!({
                    "changed_at": c.changed_at.to_rfc3339(),
                    "actor": c.actor.clone(),
                    "diff": c.diff.clone(),
                }))
                .collect::<Vec<_>>(),
        }),
    ));

    let mut timeline_events = vec![serde_json::json!({
        "type": "alert",
        "time": alert.fired_at.to_rfc3339(),
        "label": alert.title.clone(),
    })];
    for deploy in recent_deploys {
        let label = deploy
            .version
            .clone()
            .or_else(|| deploy.git_sha.clone())
            .unwrap_or_else(|| "unknown".to_string());
        timeline_events.push(serde_json::json!({
            "type": "deploy",
            "time": deploy.deployed_at.to_rfc3339(),
            "label": format!("deploy {label}"),
        }));
    }
    for change in recent_config {
        timeline_events.push(serde_json::json!({
            "type": "config",
            "time": change.changed_at.to_rfc3339(),
            "label": "config changed",
        }));
    }
    artifacts.push(artifact(
        "timeline",
        serde_json::json!({"events": timeline_events}),
    ));
    artifacts.push(artifact(
        "evidence_score",
        serde_json::to_value(&score).unwrap_or_default(),
    ));

    let artifacts: Vec<Value> = artifacts
        .iter()
        .map(|a| truncate_strings(a, settings.max_artifact_chars))
        .collect();

    let digest = build_digest(&alert.title, &artifacts);
    let query_artifact_count = artifacts
        .iter()
        .filter(|a| a.get("type").and_then(Value::as_str) == Some("logs_query"))
        .count();

    Ok(EvidenceBundle {
        digest,
        score,
        query_names: queries.iter().map(|(name, _)| name.clone()).collect(),
        executed_query_count: query_results.len(),
        query_artifact_count,
        correlation_id,
        artifacts,
    })
}

fn resolve_repo_path(settings: &Settings, configured: &str) -> String {
    if configured.is_empty() || configured.starts_with('/') {
        configured.to_string()
    } else {
        format!(
            "{}/{}",
            settings.repo_base_path.trim_end_matches('/'),
            configured
        )
    }
}

/// Compact digest handed to the LLM: titles, signatures, snippets (content
/// capped at 1800 chars), query inventory, timeline, and change context.
fn build_digest(alert_title: &str, artifacts: &[Value]) -> Value {
    let mut signatures = Value::Array(Vec::new());
    let mut snippets = Vec::new();
    let mut queries = Vec::new();
    let mut timeline = Value::Array(Vec::new());
    let mut correlation_id = Value::Null;
    let mut change_context = serde_json::json!({});

    for a in artifacts {
        match a.get("type").and_then(Value::as_str) {
            Some("log_signatures") => {
                signatures = a.get("signatures").cloned().unwrap_or_default();
            }
            Some("repo_snippet") => {
                let content: String = a
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .chars()
                    .take(1800)
                    .collect();
                snippets.push(serde_json::json!({
                    "snippet_id": a.get("snippet_id"),
                    "file_path": a.get("file_path"),
                    "line_range": format!(
                        "{}-{}",
                        a.get("start_line").and_then(Value::as_u64).unwrap_or(1),
                        a.get("end_line").and_then(Value::as_u64).unwrap_or(1),
                    ),
                    "content": content,
                    "artifact_id": a.get("artifact_id"),
                }));
            }
            Some("logs_query") => {
                queries.push(serde_json::json!({
                    "query_id": a.get("query_id"),
                    "query_name": a.get("query_name"),
                    "query": a.get("query_string"),
                    "artifact_id": a.get("artifact_id"),
                }));
            }
            Some("correlation") => {
                correlation_id = a.get("correlation_id").cloned().unwrap_or(Value::Null);
            }
            Some("timeline") => {
                timeline = a.get("events").cloned().unwrap_or_default();
            }
            Some("change_context") => {
                let commits: Vec<Value> = a
                    .get("last_commits")
                    .and_then(Value::as_array)
                    .map(|c| c.iter().take(5).cloned().collect())
                    .unwrap_or_default();
                change_context = serde_json::json!({
                    "service_version": a.get("service_version"),
                    "git_sha": a.get("git_sha"),
                    "last_commits": commits,
                    "artifact_id": a.get("artifact_id"),
                });
            }
            _ => {}
        }
    }

    serde_json::json!({
        "alert_summary": alert_title,
        "correlation_id": correlation_id,
        "signatures": signatures,
        "repo_snippets": snippets,
        "queries": queries,
        "timeline": timeline,
        "change_context": change_context,
    })
}

/// Informational cost estimate for the digest.
pub fn estimate_cost(digest: &Value) -> Value {
    let chars = canonical_json(digest).chars().count();
    let tokens = (chars / 4).max(1);
    let cost = (tokens as f64 * 0.000_002 * 1_000_000.0).round() / 1_000_000.0;
    serde_json::json!({
        "estimated_tokens": tokens,
        "estimated_cost_usd": cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_multipliers() {
        let fired = Utc::now();
        let narrowed = compute_window(fired, true, "critical", 10);
        assert_eq!(narrowed.reason, "narrowed-window-correlation-id");
        assert_eq!((narrowed.end - narrowed.start).num_minutes(), 16);

        let widened = compute_window(fired, false, "critical", 10);
        assert_eq!(widened.reason, "expanded-window-critical");
        assert_eq!((widened.end - widened.start).num_minutes(), 30);

        let default = compute_window(fired, false, "info", 10);
        assert_eq!(default.reason, "default-window");
        assert_eq!((default.end - default.start).num_minutes(), 20);
    }

    #[test]
    fn test_window_floor_is_five_minutes() {
        let fired = Utc::now();
        let window = compute_window(fired, true, "info", 1);
        assert_eq!((window.end - window.start).num_minutes(), 10);
    }

    #[test]
    fn test_patterns_rank_by_count() {
        let lines = vec![
            "ERROR timeout calling payments".to_string(),
            "ERROR timeout calling payments".to_string(),
            "WARN slow response".to_string(),
        ];
        let patterns = patterns_from_lines(&lines);
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].count, 2);
        assert!(patterns[0].pattern.contains("timeout"));
        assert_eq!(patterns[0].signature_id.len(), 12);
    }

    #[test]
    fn test_patterns_cap_at_eight_and_three_samples() {
        let mut lines = Vec::new();
        for i in 0..12 {
            lines.push(format!("unique line number {i}"));
        }
        lines.extend(std::iter::repeat("repeated line".to_string()).take(5));
        let patterns = patterns_from_lines(&lines);
        assert_eq!(patterns.len(), 8);
        assert_eq!(patterns[0].pattern, "repeated line");
        assert_eq!(patterns[0].samples.len(), 3);
    }

    #[test]
    fn test_pattern_normalization_truncates_at_180() {
        let long = "x".repeat(400);
        let patterns = patterns_from_lines(&[long.clone(), long]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern.len(), 180);
        assert_eq!(patterns[0].count, 2);
    }

    #[test]
    fn test_stack_frame_extraction() {
        let lines = vec![
            "Traceback (most recent call last):".to_string(),
            "  File \"/app/services/checkout.py\", line 42, in charge".to_string(),
            "  File \"/app/lib/db.py\", line 7, in query".to_string(),
            "ValueError: bad amount".to_string(),
        ];
        let frames = extract_stack_frames(&lines);
        assert_eq!(
            frames,
            vec![("checkout.py".to_string(), 42), ("db.py".to_string(), 7)]
        );
    }

    #[test]
    fn test_stack_frames_capped_at_five() {
        let lines: Vec<String> = (1..=9)
            .map(|i| format!("  File \"/app/m{i}.py\", line {i}, in f"))
            .collect();
        assert_eq!(extract_stack_frames(&lines).len(), 5);
    }

    #[test]
    fn test_escape_logs_regex() {
        assert_eq!(escape_logs_regex("req.1/2"), "req\\.1\\/2");
    }

    #[test]
    fn test_artifact_tagging() {
        let value = artifact("timeline", serde_json::json!({"events": []}));
        assert_eq!(value["type"], "timeline");
        assert_eq!(
            value["artifact_id"].as_str().map(str::len),
            Some(12)
        );
    }

    #[test]
    fn test_truncate_strings() {
        let value = serde_json::json!({"a": "x".repeat(100), "b": ["y".repeat(100)]});
        let truncated = truncate_strings(&value, 10);
        assert_eq!(truncated["a"].as_str().map(str::len), Some(10));
        assert_eq!(truncated["b"][0].as_str().map(str::len), Some(10));
    }

    #[test]
    fn test_cost_estimate_floor() {
        let cost = estimate_cost(&serde_json::json!({}));
        assert!(cost["estimated_tokens"].as_u64().unwrap_or(0) >= 1);
    }
}
