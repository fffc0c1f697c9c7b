//! Alertmanager webhook normalization.

use crate::adapters::{value_to_string, NormalizationError};
use crate::types::{AlertEvent, AlertSource};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize an Alertmanager webhook envelope.
pub fn normalize(payload: &Value) -> Result<AlertEvent, NormalizationError> {
    if !payload.is_object() {
        return Err(NormalizationError(
            "Alertmanager payload must be a JSON object".to_string(),
        ));
    }

    let labels = string_map(payload.get("commonLabels"));
    let annotations = string_map(payload.get("commonAnnotations"));

    let name = labels
        .get("alertname")
        .cloned()
        .unwrap_or_else(|| "unknown-alertmanager-alert".to_string());
    let service = labels
        .get("service")
        .cloned()
        .unwrap_or_else(|| "unknown-service".to_string());
    let env = labels
        .get("env")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    let state = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("firing")
        .to_uppercase();
    let severity = labels
        .get("severity")
        .cloned()
        .unwrap_or_else(|| "warning".to_string());
    let correlation_id = labels
        .get("correlation_id")
        .or_else(|| labels.get("trace_id"))
        .cloned()
        .filter(|v| !v.is_empty());

    let mut resource_refs = BTreeMap::new();
    resource_refs.insert("alert_name".to_string(), name.clone());
    resource_refs.insert("service".to_string(), service);
    resource_refs.insert("env".to_string(), env);

    Ok(AlertEvent {
        source: AlertSource::Alertmanager,
        external_id: payload
            .get("groupKey")
            .map(value_to_string)
            .unwrap_or_else(|| name.clone()),
        title: format!("Alertmanager: {name}"),
        severity,
        state,
        correlation_id,
        fired_at: Utc::now(),
        ended_at: None,
        labels,
        annotations,
        resource_refs,
        raw_payload: payload.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook_payload() -> Value {
        serde_json::json!({
            "groupKey": "{}:{alertname=\"high-error-rate\"}",
            "status": "firing",
            "commonLabels": {
                "alertname": "high-error-rate",
                "service": "checkout-api",
                "env": "prod",
                "severity": "critical",
                "correlation_id": "req-alertmanager-123",
            },
            "commonAnnotations": {"summary": "high error rate in checkout"},
            "alerts": [],
        })
    }

    #[test]
    fn test_normalize_firing_webhook() {
        let event = normalize(&webhook_payload()).expect("normalize");
        assert_eq!(event.state, "FIRING");
        assert_eq!(event.severity, "critical");
        assert_eq!(event.external_id, "{}:{alertname=\"high-error-rate\"}");
        assert_eq!(
            event.correlation_id.as_deref(),
            Some("req-alertmanager-123")
        );
        assert_eq!(event.resource_refs["service"], "checkout-api");
    }

    #[test]
    fn test_severity_defaults_to_warning() {
        let mut payload = webhook_payload();
        payload["commonLabels"]
            .as_object_mut()
            .expect("labels")
            .remove("severity");
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.severity, "warning");
    }

    #[test]
    fn test_trace_id_used_when_correlation_id_absent() {
        let mut payload = webhook_payload();
        let labels = payload["commonLabels"].as_object_mut().expect("labels");
        labels.remove("correlation_id");
        labels.insert("trace_id".into(), "trace-789012".into());
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.correlation_id.as_deref(), Some("trace-789012"));
    }

    #[test]
    fn test_label_values_coerced_to_strings() {
        let mut payload = webhook_payload();
        payload["commonLabels"]
            .as_object_mut()
            .expect("labels")
            .insert("shard".into(), serde_json::json!(7));
        let event = normalize(&payload).expect("normalize");
        assert_eq!(event.labels["shard"], "7");
    }
}
