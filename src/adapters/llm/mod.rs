//! LLM gateway: schema-constrained triage generation with provider failover.
//!
//! Two variants sit behind the `LlmGateway` trait: a hosted OpenAI client
//! (single attempt, vendor retries internally) and a self-hosted Ollama
//! client that health-checks an ordered endpoint list and fails over exactly
//! once on a mid-generation transport error.

mod ollama;
mod openai;

pub use ollama::OllamaGateway;
pub use openai::OpenAiGateway;

use crate::config::{LlmProvider, Settings};
use crate::error::LlmConfigurationError;
use crate::types::GenerationMetadata;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Shared citation-discipline instruction for both providers.
pub(crate) const SYSTEM_INSTRUCTION: &str = "You are producing an incident triage report with strict evidence-citation rules. \
Do not invent any fact. Every fact must include evidence_refs with artifact_id and pointer. \
Separate facts from hypotheses. Include claims[] that map all key statements to evidence_refs. \
If evidence is weak, set mode=insufficient_evidence and only propose next_checks with citations. \
Return JSON only and strictly follow the provided schema.";

/// Errors from a generation attempt.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No reachable endpoint or missing credentials.
    #[error(transparent)]
    Configuration(#[from] LlmConfigurationError),
    #[error("llm transport error: {0}")]
    Transport(String),
    /// The model replied, but not with usable JSON.
    #[error("{0}")]
    InvalidResponse(String),
}

/// A parsed generation plus how it was produced.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub payload: Value,
    pub metadata: GenerationMetadata,
}

/// Capability interface for triage-report generation.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a report object constrained by `schema` from the redacted
    /// evidence digest.
    async fn generate(&self, evidence_digest: &Value, schema: &Value)
        -> Result<LlmReply, LlmError>;
}

/// Build the configured gateway. Credential problems surface per-call, not
/// here, so a misconfigured provider fails the triage run rather than boot.
pub fn build_gateway(settings: &Settings) -> Arc<dyn LlmGateway> {
    match settings.llm_provider {
        LlmProvider::OpenAi => Arc::new(OpenAiGateway::new(settings)),
        LlmProvider::Local => Arc::new(OllamaGateway::new(settings)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_factory_selects_provider() {
        let mut settings = Settings::default();
        settings.llm_provider = LlmProvider::Local;
        assert_eq!(build_gateway(&settings).model_name(), "qwen2.5:7b-instruct");

        settings.llm_provider = LlmProvider::OpenAi;
        settings.openai_model = "gpt-5.3-codex".to_string();
        assert_eq!(build_gateway(&settings).model_name(), "gpt-5.3-codex");
    }
}
