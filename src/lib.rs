//! IATS: Incident Auto-Triage Service
//!
//! Pipeline that turns monitoring alerts into cited, human-reviewed
//! root-cause reports.
//!
//! ## Architecture
//!
//! - **Ingestion**: normalize source payloads, dedup into incidents, enqueue
//! - **Triage runner**: evidence gathering, no-guess gate, LLM generation
//! - **Lifecycle API**: state machine, review decisions, RBAC, audit
//! - **Worker harness**: Postgres-backed queue, at-least-once with backoff

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ingestion;
pub mod notifier;
pub mod query_library;
pub mod redaction;
pub mod registry;
pub mod storage;
pub mod triage;
pub mod types;

use crate::adapters::llm::LlmGateway;
use crate::adapters::repo::RepoSnippetFetcher;
use crate::adapters::LogsFetcher;
use crate::config::Settings;
use crate::notifier::Notifier;
use crate::query_library::QueryLibrary;
use crate::registry::ServiceRegistry;
use std::sync::Arc;

/// Shared application state for the API and the triage worker.
pub struct AppState {
    /// Database connection pool
    pub db: sqlx::PgPool,
    pub settings: Settings,
    pub registry: ServiceRegistry,
    pub query_library: QueryLibrary,
    pub notifier: Notifier,
    pub llm: Arc<dyn LlmGateway>,
    pub logs: Arc<dyn LogsFetcher>,
    pub repo_fetcher: RepoSnippetFetcher,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: sqlx::PgPool,
        settings: Settings,
        registry: ServiceRegistry,
        query_library: QueryLibrary,
        notifier: Notifier,
        llm: Arc<dyn LlmGateway>,
        logs: Arc<dyn LogsFetcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            settings,
            registry,
            query_library,
            notifier,
            llm,
            logs,
            repo_fetcher: RepoSnippetFetcher,
        })
    }
}

// Re-export commonly used types
pub use types::{AlertEvent, AlertSource, IncidentStatus, TriageReportPayload};
