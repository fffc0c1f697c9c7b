//! CloudWatch adapters: alarm-event normalization and Logs Insights fetch.

use crate::adapters::{value_to_string, LogsFetcher, LogsQueryResult, NormalizationError};
use crate::types::{AlertEvent, AlertSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn correlation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(correlation[_\s-]?id|request[_\s-]?id|trace[_\s-]?id)\s*[:=]\s*([A-Za-z0-9_.:/-]{6,})")
            .expect("valid regex")
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, NormalizationError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NormalizationError(format!("unparseable timestamp '{raw}': {e}")))
}

/// Normalize a CloudWatch EventBridge alarm state payload.
pub fn normalize(payload: &Value) -> Result<AlertEvent, NormalizationError> {
    let detail = payload
        .get("detail")
        .and_then(Value::as_object)
        .ok_or_else(|| NormalizationError("missing detail in CloudWatch payload".to_string()))?;

    let alarm_name = detail
        .get("alarmName")
        .and_then(Value::as_str)
        .unwrap_or("unknown-alarm")
        .to_string();
    let state = detail.get("state").cloned().unwrap_or(Value::Null);
    let state_value = state
        .get("value")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let previous_state = detail
        .get("previousState")
        .and_then(|p| p.get("value"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let fired_time = state
        .get("timestamp")
        .and_then(Value::as_str)
        .or_else(|| payload.get("time").and_then(Value::as_str))
        .ok_or_else(|| NormalizationError("missing state timestamp".to_string()))?;
    let fired_at = parse_timestamp(fired_time)?;
    let ended_at = (state_value == "OK").then_some(fired_at);

    let region = payload
        .get("region")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let account_id = payload
        .get("account")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let reason = state
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let correlation_id = extract_correlation_id(payload, detail, &reason);
    let severity = if state_value == "ALARM" { "critical" } else { "info" };

    let mut labels = BTreeMap::new();
    labels.insert("alarm_name".to_string(), alarm_name.clone());
    labels.insert("region".to_string(), region.clone());
    labels.insert("account_id".to_string(), account_id.clone());
    labels.insert("previous_state".to_string(), previous_state);

    let mut annotations = BTreeMap::new();
    annotations.insert("reason".to_string(), reason);

    let mut resource_refs = BTreeMap::new();
    resource_refs.insert("alarm_name".to_string(), alarm_name.clone());
    resource_refs.insert("region".to_string(), region);
    resource_refs.insert("account_id".to_string(), account_id);
    resource_refs.insert(
        "correlation_id".to_string(),
        correlation_id.clone().unwrap_or_default(),
    );

    Ok(AlertEvent {
        source: AlertSource::Cloudwatch,
        external_id: payload
            .get("id")
            .map(value_to_string)
            .unwrap_or_else(|| alarm_name.clone()),
        title: format!("CloudWatch Alarm: {alarm_name}"),
        severity: severity.to_string(),
        state: state_value,
        correlation_id,
        fired_at,
        ended_at,
        labels,
        annotations,
        resource_refs,
        raw_payload: payload.clone(),
    })
}

fn extract_correlation_id(
    payload: &Value,
    detail: &serde_json::Map<String, Value>,
    reason: &str,
) -> Option<String> {
    let candidate_keys = [
        "correlationId",
        "correlation_id",
        "requestId",
        "request_id",
        "traceId",
        "trace_id",
    ];
    let candidates = candidate_keys
        .iter()
        .filter_map(|key| detail.get(*key))
        .chain(candidate_keys.iter().filter_map(|key| payload.get(*key)));
    for value in candidates {
        if let Some(text) = value.as_str() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    correlation_pattern()
        .captures(reason)
        .map(|caps| caps[2].to_string())
}

/// Fetch logs from CloudWatch Logs Insights.
pub struct CloudWatchLogsFetcher {
    client: aws_sdk_cloudwatchlogs::Client,
}

impl CloudWatchLogsFetcher {
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_cloudwatchlogs::Client::new(&config),
        }
    }
}

#[async_trait]
impl LogsFetcher for CloudWatchLogsFetcher {
    async fn fetch_logs(
        &self,
        log_group: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        query: &str,
    ) -> anyhow::Result<LogsQueryResult> {
        let started = self
            .client
            .start_query()
            .log_group_name(log_group)
            .start_time(start.timestamp())
            .end_time(end.timestamp())
            .query_string(query)
            .limit(200)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start logs query: {e}"))?;
        let query_id = started
            .query_id()
            .ok_or_else(|| anyhow::anyhow!("logs backend returned no query id"))?
            .to_string();

        let results = self
            .client
            .get_query_results()
            .query_id(&query_id)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read logs query results: {e}"))?;

        let rows: Vec<Value> = results
            .results()
            .iter()
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|field| {
                            serde_json::json!({
                                "field": field.field().unwrap_or_default(),
                                "value": field.value().unwrap_or_default(),
                            })
                        })
                        .collect(),
                )
            })
            .collect();

        Ok(LogsQueryResult {
            query_id: Some(query_id),
            result: serde_json::json!({ "results": rows }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm_payload() -> Value {
        serde_json::json!({
            "id": "evt-1",
            "time": "2026-02-06T12:00:00Z",
            "region": "us-east-1",
            "account": "123456789012",
            "detail": {
                "alarmName": "iats-demo-high-error-rate",
                "state": {
                    "value": "ALARM",
                    "timestamp": "2026-02-06T12:00:00Z",
                    "reason": "Threshold crossed: 5 datapoints",
                },
                "previousState": {"value": "OK"},
            },
        })
    }

    #[test]
    fn test_normalize_alarm_state() {
        let event = normalize(&alarm_payload()).expect("normalize");
        assert_eq!(event.severity, "critical");
        assert_eq!(event.state, "ALARM");
        assert!(event.ended_at.is_none());
        assert_eq!(event.labels["alarm_name"], "iats-demo-high-error-rate");
        assert_eq!(event.labels["previous_state"], "OK");
        assert_eq!(event.title, "CloudWatch Alarm: iats-demo-high-error-rate");
    }

    #[test]
    fn test_ok_state_sets_ended_at_and_info_severity() {
        let mut payload = alarm_payload();
        payload["detail"]["state"]["value"] = "OK".into();
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.severity, "info");
        assert_eq!(event.ended_at, Some(event.fired_at));
    }

    #[test]
    fn test_missing_timestamp_is_a_normalization_error() {
        let mut payload = alarm_payload();
        payload["detail"]["state"]
            .as_object_mut()
            .expect("state object")
            .remove("timestamp");
        payload.as_object_mut().expect("payload object").remove("time");
        assert!(normalize(&payload).is_err());
    }

    #[test]
    fn test_missing_detail_is_a_normalization_error() {
        assert!(normalize(&serde_json::json!({"time": "2026-02-06T12:00:00Z"})).is_err());
    }

    #[test]
    fn test_correlation_id_from_detail_field() {
        let mut payload = alarm_payload();
        payload["detail"]["requestId"] = "req-abc-123".into();
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.correlation_id.as_deref(), Some("req-abc-123"));
    }

    #[test]
    fn test_correlation_id_field_priority() {
        let mut payload = alarm_payload();
        payload["detail"]["traceId"] = "trace-xyz-999".into();
        payload["detail"]["correlationId"] = "corr-first-111".into();
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.correlation_id.as_deref(), Some("corr-first-111"));
    }

    #[test]
    fn test_correlation_id_scanned_from_reason_text() {
        let mut payload = alarm_payload();
        payload["detail"]["state"]["reason"] =
            "5xx spike observed, correlation_id: req-reason-4567 during rollout".into();
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.correlation_id.as_deref(), Some("req-reason-4567"));
    }

    #[test]
    fn test_short_ids_in_reason_are_ignored() {
        let mut payload = alarm_payload();
        payload["detail"]["state"]["reason"] = "trace_id: abc".into();
        let event = normalize(&payload).expect("normalize");
        assert!(event.correlation_id.is_none());
    }
}
