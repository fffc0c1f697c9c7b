//! Service configuration — environment variables with CLI overrides.

use tracing::warn;

/// Which LLM provider backs triage generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Hosted OpenAI-compatible endpoint.
    OpenAi,
    /// Self-hosted Ollama endpoint fleet.
    Local,
}

/// Environment-driven settings for the triage service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    // ─── LLM gateway ───────────────────────────────────────────────────────
    pub llm_provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub local_llm_model: String,
    /// Ordered Ollama endpoint list; the legacy single base URL is prepended.
    pub ollama_endpoints: Vec<String>,
    pub ollama_endpoint_cache_ttl_seconds: u64,
    pub ollama_healthcheck_timeout_seconds: u64,
    pub local_llm_timeout_seconds: u64,

    // ─── Evidence sources ──────────────────────────────────────────────────
    pub aws_region: String,
    /// Read fixture JSON instead of querying external backends.
    pub fixture_mode: bool,
    pub fixture_dir: String,
    /// Store artifacts unredacted.
    pub allow_raw_storage: bool,
    pub repo_base_path: String,
    pub repo_recent_commits_limit: usize,
    pub service_registry_path: String,
    pub query_library_path: String,

    // ─── Triage pipeline ───────────────────────────────────────────────────
    pub triage_window_minutes: i64,
    pub max_repo_snippets: usize,
    pub max_logs_queries_per_incident: usize,
    pub deploy_correlation_window_minutes: i64,
    pub max_artifact_chars: usize,
    pub evidence_min_refs_for_confident_report: usize,
    pub no_guess_confidence_threshold: f64,

    // ─── Auth ──────────────────────────────────────────────────────────────
    pub auth_enabled: bool,
    pub auth_shared_token: Option<String>,

    // ─── Worker harness ────────────────────────────────────────────────────
    pub task_max_retries: i32,
    pub retry_backoff_seconds: i64,
    pub retry_jitter: bool,
    /// Run the triage task synchronously inside the ingest call path.
    pub worker_inline: bool,
    pub worker_poll_interval_secs: u64,
    /// Worker tasks; each claims a single job at a time (prefetch=1).
    pub worker_concurrency: usize,

    // ─── Housekeeping & sinks ──────────────────────────────────────────────
    pub data_retention_days: i64,
    pub slack_webhook_url: Option<String>,
    pub ticket_sink_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            bind_address: "0.0.0.0:8080".to_string(),
            llm_provider: LlmProvider::Local,
            openai_api_key: None,
            openai_model: "gpt-5.3-codex".to_string(),
            local_llm_model: "qwen2.5:7b-instruct".to_string(),
            ollama_endpoints: vec!["http://ollama:11434".to_string()],
            ollama_endpoint_cache_ttl_seconds: 60,
            ollama_healthcheck_timeout_seconds: 3,
            local_llm_timeout_seconds: 300,
            aws_region: "us-east-1".to_string(),
            fixture_mode: true,
            fixture_dir: "fixtures".to_string(),
            allow_raw_storage: false,
            repo_base_path: "/repos".to_string(),
            repo_recent_commits_limit: 5,
            service_registry_path: "config/service_registry.toml".to_string(),
            query_library_path: "config/query_library.toml".to_string(),
            triage_window_minutes: 10,
            max_repo_snippets: 5,
            max_logs_queries_per_incident: 5,
            deploy_correlation_window_minutes: 90,
            max_artifact_chars: 12_000,
            evidence_min_refs_for_confident_report: 3,
            no_guess_confidence_threshold: 0.45,
            auth_enabled: true,
            auth_shared_token: Some("dev-shared-token".to_string()),
            task_max_retries: 3,
            retry_backoff_seconds: 5,
            retry_jitter: true,
            worker_inline: false,
            worker_poll_interval_secs: 1,
            worker_concurrency: 2,
            data_retention_days: 30,
            slack_webhook_url: None,
            ticket_sink_enabled: false,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key = key, value = %raw, "Unparseable env value, keeping default");
                current
            }
        },
        Err(_) => current,
    }
}

fn env_bool(key: &str, current: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => current,
    }
}

impl Settings {
    /// Load configuration from environment variables with CLI overrides.
    pub fn from_env(
        database_url: Option<String>,
        bind_address: Option<String>,
        port: Option<u16>,
    ) -> anyhow::Result<Self> {
        let mut config = Self::default();

        // Database URL: CLI arg > env var
        config.database_url = database_url
            .or_else(|| env_string("DATABASE_URL"))
            .unwrap_or_default();

        // Bind address: CLI --bind-address or --port
        if let Some(addr) = bind_address {
            config.bind_address = addr;
        } else if let Some(p) = port {
            config.bind_address = format!("0.0.0.0:{}", p);
        }

        config.llm_provider = match env_string("LLM_PROVIDER").as_deref() {
            Some("openai") => LlmProvider::OpenAi,
            Some("local") | None => LlmProvider::Local,
            Some(other) => {
                anyhow::bail!("unsupported LLM_PROVIDER={other} (expected openai|local)");
            }
        };
        config.openai_api_key = env_string("OPENAI_API_KEY");
        if let Some(v) = env_string("OPENAI_MODEL") {
            config.openai_model = v;
        }
        if let Some(v) = env_string("LOCAL_LLM_MODEL") {
            config.local_llm_model = v;
        }

        // Endpoint list: OLLAMA_ENDPOINTS is csv; the legacy single-URL
        // OLLAMA_BASE_URL is prepended for compatibility.
        let mut endpoints: Vec<String> = env_string("OLLAMA_ENDPOINTS")
            .map(|csv| {
                csv.split(',')
                    .map(|e| e.trim().trim_end_matches('/').to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(legacy) = env_string("OLLAMA_BASE_URL") {
            let legacy = legacy.trim_end_matches('/').to_string();
            if !endpoints.contains(&legacy) {
                endpoints.insert(0, legacy);
            }
        }
        if !endpoints.is_empty() {
            config.ollama_endpoints = endpoints;
        }
        config.ollama_endpoint_cache_ttl_seconds = env_parse(
            "OLLAMA_ENDPOINT_CACHE_TTL_SECONDS",
            config.ollama_endpoint_cache_ttl_seconds,
        );
        config.ollama_healthcheck_timeout_seconds = env_parse(
            "OLLAMA_HEALTHCHECK_TIMEOUT_SECONDS",
            config.ollama_healthcheck_timeout_seconds,
        );
        config.local_llm_timeout_seconds =
            env_parse("LOCAL_LLM_TIMEOUT_SECONDS", config.local_llm_timeout_seconds);

        if let Some(v) = env_string("AWS_REGION") {
            config.aws_region = v;
        }
        config.fixture_mode = env_bool("FIXTURE_MODE", config.fixture_mode);
        if let Some(v) = env_string("FIXTURE_DIR") {
            config.fixture_dir = v;
        }
        config.allow_raw_storage = env_bool("ALLOW_RAW_STORAGE", config.allow_raw_storage);
        if let Some(v) = env_string("REPO_BASE_PATH") {
            config.repo_base_path = v;
        }
        config.repo_recent_commits_limit = env_parse(
            "REPO_RECENT_COMMITS_LIMIT",
            config.repo_recent_commits_limit,
        );
        if let Some(v) = env_string("SERVICE_REGISTRY_PATH") {
            config.service_registry_path = v;
        }
        if let Some(v) = env_string("QUERY_LIBRARY_PATH") {
            config.query_library_path = v;
        }

        config.triage_window_minutes =
            env_parse("TRIAGE_WINDOW_MINUTES", config.triage_window_minutes);
        config.max_repo_snippets = env_parse("MAX_REPO_SNIPPETS", config.max_repo_snippets);
        config.max_logs_queries_per_incident = env_parse(
            "MAX_LOGS_QUERIES_PER_INCIDENT",
            config.max_logs_queries_per_incident,
        );
        config.deploy_correlation_window_minutes = env_parse(
            "DEPLOY_CORRELATION_WINDOW_MINUTES",
            config.deploy_correlation_window_minutes,
        );
        config.max_artifact_chars = env_parse("MAX_ARTIFACT_CHARS", config.max_artifact_chars);
        config.evidence_min_refs_for_confident_report = env_parse(
            "EVIDENCE_MIN_REFS_FOR_CONFIDENT_REPORT",
            config.evidence_min_refs_for_confident_report,
        );
        config.no_guess_confidence_threshold = env_parse(
            "NO_GUESS_CONFIDENCE_THRESHOLD",
            config.no_guess_confidence_threshold,
        );

        config.auth_enabled = env_bool("AUTH_ENABLED", config.auth_enabled);
        if std::env::var("AUTH_SHARED_TOKEN").is_ok() {
            config.auth_shared_token = env_string("AUTH_SHARED_TOKEN");
        }

        config.task_max_retries = env_parse("CELERY_TASK_MAX_RETRIES", config.task_max_retries);
        config.retry_backoff_seconds =
            env_parse("CELERY_RETRY_BACKOFF_SECONDS", config.retry_backoff_seconds);
        config.retry_jitter = env_bool("CELERY_RETRY_JITTER", config.retry_jitter);
        config.worker_inline = env_bool("WORKER_INLINE", config.worker_inline);
        config.worker_poll_interval_secs = env_parse(
            "WORKER_POLL_INTERVAL_SECS",
            config.worker_poll_interval_secs,
        );
        config.worker_concurrency =
            env_parse("WORKER_CONCURRENCY", config.worker_concurrency).max(1);

        config.data_retention_days =
            env_parse("DATA_RETENTION_DAYS", config.data_retention_days);
        config.slack_webhook_url = env_string("SLACK_WEBHOOK_URL");
        config.ticket_sink_enabled =
            env_bool("TICKET_SINK_ENABLED", config.ticket_sink_enabled);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.llm_provider, LlmProvider::Local);
        assert_eq!(settings.triage_window_minutes, 10);
        assert_eq!(settings.deploy_correlation_window_minutes, 90);
        assert!(settings.fixture_mode);
    }

    #[test]
    fn test_legacy_base_url_is_prepended_to_endpoint_list() {
        std::env::set_var(
            "OLLAMA_ENDPOINTS",
            "http://ollama-a:11434, http://ollama-b:11434/",
        );
        std::env::set_var("OLLAMA_BASE_URL", "http://legacy:11434");
        let settings =
            Settings::from_env(Some("postgres://unused".to_string()), None, None)
                .expect("settings");
        std::env::remove_var("OLLAMA_ENDPOINTS");
        std::env::remove_var("OLLAMA_BASE_URL");

        assert_eq!(
            settings.ollama_endpoints,
            vec![
                "http://legacy:11434",
                "http://ollama-a:11434",
                "http://ollama-b:11434",
            ]
        );
    }
}
