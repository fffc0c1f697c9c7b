//! Notification sinks for incident lifecycle updates.

use crate::config::Settings;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// Outbound notification capability.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str, payload: &Value);
}

/// Log-line sink, always active.
pub struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn send(&self, message: &str, _payload: &Value) {
        info!(target: "iats::notify", "{message}");
    }
}

/// Slack incoming-webhook sink.
pub struct SlackSink {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackSink {
    pub fn new(webhook_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { webhook_url, http }
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    async fn send(&self, message: &str, payload: &Value) {
        let mut body = serde_json::json!({"text": message});
        if let (Some(body_map), Some(extra)) = (body.as_object_mut(), payload.as_object()) {
            for (key, value) in extra {
                body_map.insert(key.clone(), value.clone());
            }
        }
        if let Err(error) = self.http.post(&self.webhook_url).json(&body).send().await {
            warn!(error = %error, "Slack notify failed");
        }
    }
}

/// Stub sink for ticket creation integration.
pub struct TicketSink;

#[async_trait]
impl NotificationSink for TicketSink {
    async fn send(&self, message: &str, payload: &Value) {
        info!(target: "iats::notify", payload = %payload, "[TICKET_STUB] {message}");
    }
}

/// Fan-out notifier over the configured sinks.
pub struct Notifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl Notifier {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(ConsoleSink)];
        if let Some(url) = &settings.slack_webhook_url {
            sinks.push(Box::new(SlackSink::new(url.clone())));
        }
        if settings.ticket_sink_enabled {
            sinks.push(Box::new(TicketSink));
        }
        Self { sinks }
    }

    pub async fn notify(&self, message: &str) {
        let empty = serde_json::json!({});
        for sink in &self.sinks {
            sink.send(message, &empty).await;
        }
    }

    /// Incident update with ownership context from the service registry.
    #[allow(clippy::too_many_arguments)]
    pub async fn notify_incident_update(
        &self,
        incident_id: &str,
        service: &str,
        env: &str,
        status: &str,
        owners: &[String],
        runbook_url: &str,
        dashboard_url: &str,
        details: Option<&str>,
    ) {
        let owners_text = if owners.is_empty() {
            "unknown".to_string()
        } else {
            owners.join(", ")
        };
        let mut message = format!(
            "incident={incident_id} service={service} env={env} status={status} owners={owners_text}"
        );
        if let Some(details) = details {
            message.push_str(&format!(" details={details}"));
        }
        let payload = serde_json::json!({
            "attachments": [{
                "fields": [
                    {"title": "Owners", "value": owners_text, "short": false},
                    {
                        "title": "Runbook",
                        "value": if runbook_url.is_empty() { "not configured" } else { runbook_url },
                        "short": false,
                    },
                    {
                        "title": "Dashboard",
                        "value": if dashboard_url.is_empty() { "not configured" } else { dashboard_url },
                        "short": false,
                    },
                ],
            }],
        });
        for sink in &self.sinks {
            sink.send(&message, &payload).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_selection_follows_settings() {
        let mut settings = Settings::default();
        settings.slack_webhook_url = None;
        settings.ticket_sink_enabled = false;
        assert_eq!(Notifier::from_settings(&settings).sinks.len(), 1);

        settings.slack_webhook_url = Some("https://hooks.slack.example/T000".to_string());
        settings.ticket_sink_enabled = true;
        assert_eq!(Notifier::from_settings(&settings).sinks.len(), 3);
    }
}
