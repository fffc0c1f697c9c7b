//! Self-hosted Ollama gateway with multi-endpoint health-checked failover.

use crate::adapters::llm::{LlmError, LlmGateway, LlmReply, SYSTEM_INSTRUCTION};
use crate::config::Settings;
use crate::error::LlmConfigurationError;
use crate::hashing::canonical_json;
use crate::types::GenerationMetadata;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cached healthy endpoint; refreshed under a TTL and only honored while the
/// endpoint is still part of the configured list.
struct EndpointCache {
    endpoint: String,
    expires_at: Instant,
}

pub struct OllamaGateway {
    endpoints: Vec<String>,
    model: String,
    cache_ttl: Duration,
    health_timeout: Duration,
    http: reqwest::Client,
    cache: RwLock<Option<EndpointCache>>,
}

impl OllamaGateway {
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.local_llm_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            endpoints: settings.ollama_endpoints.clone(),
            model: settings.local_llm_model.clone(),
            cache_ttl: Duration::from_secs(settings.ollama_endpoint_cache_ttl_seconds),
            health_timeout: Duration::from_secs(settings.ollama_healthcheck_timeout_seconds),
            http,
            cache: RwLock::new(None),
        }
    }

    /// Healthy iff `/api/tags` answers 200 and the configured model appears
    /// in the returned `models[].name` set.
    async fn endpoint_is_healthy(&self, endpoint: &str) -> bool {
        let response = self
            .http
            .get(format!("{endpoint}/api/tags"))
            .timeout(self.health_timeout)
            .send()
            .await;
        let Ok(response) = response else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        let Ok(body) = response.json::<Value>().await else {
            return false;
        };
        body.get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models.iter().any(|m| {
                    m.get("name").and_then(Value::as_str) == Some(self.model.as_str())
                })
            })
            .unwrap_or(false)
    }

    /// Reuse the cached endpoint while it is fresh and still configured;
    /// otherwise pick the first healthy endpoint and cache it.
    async fn select_endpoint(&self) -> Result<String, LlmConfigurationError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if Instant::now() < cached.expires_at
                    && self.endpoints.contains(&cached.endpoint)
                {
                    return Ok(cached.endpoint.clone());
                }
            }
        }

        for endpoint in &self.endpoints {
            if self.endpoint_is_healthy(endpoint).await {
                self.remember(endpoint).await;
                return Ok(endpoint.clone());
            }
        }
        Err(LlmConfigurationError(format!(
            "failed to reach any Ollama endpoint: {}",
            self.endpoints.join(", ")
        )))
    }

    async fn remember(&self, endpoint: &str) {
        let mut cache = self.cache.write().await;
        *cache = Some(EndpointCache {
            endpoint: endpoint.to_string(),
            expires_at: Instant::now() + self.cache_ttl,
        });
    }

    /// The next healthy endpoint strictly after `failed` in configured order.
    async fn failover_endpoint(&self, failed: &str) -> Option<String> {
        let failed_index = self.endpoints.iter().position(|e| e == failed)?;
        for endpoint in self.endpoints.iter().skip(failed_index + 1) {
            if self.endpoint_is_healthy(endpoint).await {
                self.remember(endpoint).await;
                return Some(endpoint.clone());
            }
        }
        None
    }

    async fn post_generate(&self, endpoint: &str, body: &Value) -> Result<Value, LlmError> {
        let response = self
            .http
            .post(format!("{endpoint}/api/generate"))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("{endpoint}: {e}")))?;
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!(
                "{endpoint}: HTTP {}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::Transport(format!("{endpoint}: {e}")))
    }
}

#[async_trait]
impl LlmGateway for OllamaGateway {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        evidence_digest: &Value,
        schema: &Value,
    ) -> Result<LlmReply, LlmError> {
        let prompt = canonical_json(&serde_json::json!({
            "system_instruction": SYSTEM_INSTRUCTION,
            "evidence_pack_digest": evidence_digest,
            "json_schema": schema,
        }));
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": schema,
            "prompt": prompt,
            "options": {"temperature": 0.2},
        });

        let endpoint = self.select_endpoint().await?;
        let mut failover_count: i64 = 0;
        let mut endpoint_used = endpoint.clone();

        let document = match self.post_generate(&endpoint, &body).await {
            Ok(document) => document,
            Err(LlmError::Transport(first_error)) => {
                // Exactly one failover to the next healthy endpoint.
                warn!(endpoint = %endpoint, error = %first_error, "Ollama generation failed, attempting failover");
                let Some(next) = self.failover_endpoint(&endpoint).await else {
                    return Err(LlmError::Transport(first_error));
                };
                failover_count = 1;
                endpoint_used = next.clone();
                self.post_generate(&next, &body).await?
            }
            Err(other) => return Err(other),
        };

        let text = document
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "local LLM response was empty".to_string(),
            ));
        }
        let payload: Value = serde_json::from_str(text).map_err(|_| {
            LlmError::InvalidResponse("local LLM returned invalid JSON".to_string())
        })?;

        debug!(endpoint = %endpoint_used, failovers = failover_count, "Ollama generation complete");
        Ok(LlmReply {
            payload,
            metadata: GenerationMetadata {
                llm_provider: "local".to_string(),
                llm_endpoint_used: Some(endpoint_used),
                endpoint_failover_count: Some(failover_count),
            },
        })
    }
}
