//! Canonical hashing helpers for dedup keys and artifact ids.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic SHA-256 hex digest of a string.
pub fn stable_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value canonically: object keys sorted, no whitespace.
///
/// Key order is enforced here rather than relying on the map backing of
/// `serde_json`, so the output is stable no matter how the value was built.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Deterministic dedup key from the identity fields of an alert.
///
/// Independent of label insertion order: labels are keyed into a sorted map
/// before canonicalization.
pub fn dedup_key_for(
    service: &str,
    env: &str,
    resource_key: &str,
    labels: &BTreeMap<String, String>,
    correlation_id: Option<&str>,
) -> String {
    let payload = serde_json::json!({
        "service": service,
        "env": env,
        "resource_key": resource_key,
        "correlation_id": correlation_id.unwrap_or(""),
        "labels": labels,
    });
    stable_hash(&canonical_json(&payload))
}

/// Artifact id: short hash over `<type>:<canonical payload>`.
pub fn artifact_id_for(artifact_type: &str, payload: &Value) -> String {
    let canonical = canonical_json(payload);
    stable_hash(&format!("{}:{}", artifact_type, canonical))[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn test_dedup_key_independent_of_label_order() {
        let mut first = BTreeMap::new();
        first.insert("alarm_name".to_string(), "high-errors".to_string());
        first.insert("region".to_string(), "us-east-1".to_string());

        let mut second = BTreeMap::new();
        second.insert("region".to_string(), "us-east-1".to_string());
        second.insert("alarm_name".to_string(), "high-errors".to_string());

        let a = dedup_key_for("checkout-api", "prod", "high-errors", &first, None);
        let b = dedup_key_for("checkout-api", "prod", "high-errors", &second, None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_dedup_key_varies_with_correlation_id() {
        let labels = BTreeMap::new();
        let a = dedup_key_for("svc", "prod", "alarm", &labels, None);
        let b = dedup_key_for("svc", "prod", "alarm", &labels, Some("req-123"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_artifact_id_is_short_and_stable() {
        let payload = serde_json::json!({"signatures": []});
        let a = artifact_id_for("log_signatures", &payload);
        let b = artifact_id_for("log_signatures", &payload);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        let c = artifact_id_for("timeline", &payload);
        assert_ne!(a, c);
    }
}
