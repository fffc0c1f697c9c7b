//! Hosted OpenAI gateway. Single attempt; the vendor SDK path retries
//! internally, so no endpoint failover is layered on top.

use crate::adapters::llm::{LlmError, LlmGateway, LlmReply, SYSTEM_INSTRUCTION};
use crate::config::Settings;
use crate::error::LlmConfigurationError;
use crate::types::GenerationMetadata;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiGateway {
    api_key: Option<String>,
    model: String,
    http: reqwest::Client,
}

impl OpenAiGateway {
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.local_llm_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            api_key: settings.openai_api_key.clone(),
            model: settings.openai_model.clone(),
            http,
        }
    }

    /// Walk the Responses API document for output text.
    fn output_text(document: &Value) -> String {
        if let Some(text) = document.get("output_text").and_then(Value::as_str) {
            return text.to_string();
        }
        let mut collected = String::new();
        if let Some(outputs) = document.get("output").and_then(Value::as_array) {
            for output in outputs {
                if let Some(contents) = output.get("content").and_then(Value::as_array) {
                    for content in contents {
                        if content.get("type").and_then(Value::as_str) == Some("output_text") {
                            if let Some(text) = content.get("text").and_then(Value::as_str) {
                                collected.push_str(text);
                            }
                        }
                    }
                }
            }
        }
        collected
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        evidence_digest: &Value,
        schema: &Value,
    ) -> Result<LlmReply, LlmError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LlmConfigurationError("OPENAI_API_KEY is not configured".to_string())
        })?;

        let user_content = serde_json::json!({
            "evidence_pack_digest": evidence_digest,
            "json_schema": schema,
        });
        let body = serde_json::json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": SYSTEM_INSTRUCTION},
                {"role": "user", "content": user_content.to_string()},
            ],
            "text": {"format": {"type": "json_object"}},
        });

        let response = self
            .http
            .post(RESPONSES_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!(
                "OpenAI returned HTTP {}",
                response.status()
            )));
        }
        let document: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let text = Self::output_text(&document);
        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "LLM response was empty".to_string(),
            ));
        }
        let payload: Value = serde_json::from_str(&text)
            .map_err(|_| LlmError::InvalidResponse("LLM returned invalid JSON".to_string()))?;

        Ok(LlmReply {
            payload,
            metadata: GenerationMetadata {
                llm_provider: "openai".to_string(),
                llm_endpoint_used: None,
                endpoint_failover_count: Some(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn test_missing_key_is_a_configuration_error() {
        let mut settings = Settings::default();
        settings.openai_api_key = None;
        let gateway = OpenAiGateway::new(&settings);
        let result = gateway
            .generate(&serde_json::json!({}), &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(LlmError::Configuration(_))));
    }

    #[test]
    fn test_output_text_walks_response_document() {
        let document = serde_json::json!({
            "output": [
                {"content": [
                    {"type": "output_text", "text": "{\"summary\":"},
                    {"type": "output_text", "text": "\"ok\"}"},
                ]},
            ],
        });
        assert_eq!(OpenAiGateway::output_text(&document), "{\"summary\":\"ok\"}");
    }
}
