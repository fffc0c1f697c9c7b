//! External collaborators behind capability traits: alert sources, the log
//! backend, the source-code host, and the LLM gateway.

pub mod alertmanager;
pub mod cloudwatch;
pub mod llm;
pub mod repo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Raised when a source payload cannot be normalized into an `AlertEvent`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NormalizationError(pub String);

/// One executed Logs Insights query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsQueryResult {
    #[serde(default)]
    pub query_id: Option<String>,
    /// Raw result document; rows live under `result.results`.
    pub result: Value,
}

impl LogsQueryResult {
    /// Flatten `@message` columns out of a Logs Insights result document.
    pub fn message_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let rows = self
            .result
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            match row {
                Value::Object(fields) => {
                    if let Some(message) = fields
                        .get("@message")
                        .or_else(|| fields.get("message"))
                        .and_then(Value::as_str)
                    {
                        if !message.is_empty() {
                            lines.push(message.to_string());
                        }
                    }
                }
                Value::Array(columns) => {
                    for column in columns {
                        let is_message = column.get("field").and_then(Value::as_str)
                            == Some("@message");
                        if is_message {
                            if let Some(message) =
                                column.get("value").and_then(Value::as_str)
                            {
                                if !message.is_empty() {
                                    lines.push(message.to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        lines
    }
}

/// Fetch correlated log evidence for a time window.
#[async_trait]
pub trait LogsFetcher: Send + Sync {
    async fn fetch_logs(
        &self,
        log_group: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        query: &str,
    ) -> anyhow::Result<LogsQueryResult>;
}

/// Fixture-backed fetcher used in fixture mode and tests: every query
/// returns the canned Logs Insights result document.
pub struct FixtureLogsFetcher {
    fixture_path: PathBuf,
}

impl FixtureLogsFetcher {
    pub fn new(fixture_dir: &str) -> Self {
        Self {
            fixture_path: PathBuf::from(fixture_dir).join("logs_insights_result.json"),
        }
    }
}

#[async_trait]
impl LogsFetcher for FixtureLogsFetcher {
    async fn fetch_logs(
        &self,
        _log_group: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _query: &str,
    ) -> anyhow::Result<LogsQueryResult> {
        let raw = tokio::fs::read_to_string(&self.fixture_path).await?;
        let document: Value = serde_json::from_str(&raw)?;
        Ok(LogsQueryResult {
            query_id: document
                .get("query_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            result: document
                .get("result")
                .cloned()
                .unwrap_or(document),
        })
    }
}

/// Coerce any JSON value into its string form, keeping strings unquoted.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_lines_from_object_rows() {
        let result = LogsQueryResult {
            query_id: None,
            result: serde_json::json!({
                "results": [
                    {"@message": "ERROR boom"},
                    {"message": "WARN slow"},
                    {"@message": ""},
                ],
            }),
        };
        assert_eq!(result.message_lines(), vec!["ERROR boom", "WARN slow"]);
    }

    #[test]
    fn test_message_lines_from_column_rows() {
        let result = LogsQueryResult {
            query_id: Some("q1".into()),
            result: serde_json::json!({
                "results": [
                    [
                        {"field": "@timestamp", "value": "2026-02-06T12:00:00Z"},
                        {"field": "@message", "value": "Traceback (most recent call last):"},
                    ],
                ],
            }),
        };
        assert_eq!(
            result.message_lines(),
            vec!["Traceback (most recent call last):"]
        );
    }
}
