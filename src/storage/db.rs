//! Database connection pool and idempotent startup migrations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the schema. Everything here is additive and idempotent
/// (`IF NOT EXISTS` guards), so it is safe to run on every startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Applying database schema...");

    let statements = [
        r#"CREATE TABLE IF NOT EXISTS alert_events (
            id UUID PRIMARY KEY,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            title TEXT NOT NULL,
            severity TEXT NOT NULL,
            state TEXT NOT NULL,
            correlation_id TEXT,
            fired_at TIMESTAMPTZ NOT NULL,
            ended_at TIMESTAMPTZ,
            labels JSONB NOT NULL DEFAULT '{}'::jsonb,
            annotations JSONB NOT NULL DEFAULT '{}'::jsonb,
            resource_refs JSONB NOT NULL DEFAULT '{}'::jsonb,
            raw_payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS incidents (
            id UUID PRIMARY KEY,
            dedup_key TEXT NOT NULL UNIQUE,
            service TEXT NOT NULL,
            env TEXT NOT NULL,
            service_version TEXT,
            git_sha TEXT,
            correlation_id TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            latest_alert_event_id UUID REFERENCES alert_events(id),
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_incidents_dedup_key ON incidents (dedup_key)",
        "CREATE INDEX IF NOT EXISTS idx_incidents_service_env ON incidents (service, env)",
        r#"CREATE TABLE IF NOT EXISTS evidence_packs (
            id UUID PRIMARY KEY,
            incident_id UUID NOT NULL REFERENCES incidents(id),
            time_window_start TIMESTAMPTZ NOT NULL,
            time_window_end TIMESTAMPTZ NOT NULL,
            artifacts JSONB NOT NULL,
            provenance JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_evidence_packs_incident ON evidence_packs (incident_id, created_at DESC)",
        r#"CREATE TABLE IF NOT EXISTS triage_reports (
            id UUID PRIMARY KEY,
            incident_id UUID NOT NULL UNIQUE REFERENCES incidents(id),
            generated_at TIMESTAMPTZ NOT NULL,
            model TEXT NOT NULL,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS review_decisions (
            id UUID PRIMARY KEY,
            incident_id UUID NOT NULL REFERENCES incidents(id),
            decision TEXT NOT NULL,
            notes TEXT,
            decided_by TEXT NOT NULL DEFAULT 'unknown',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_review_decisions_incident ON review_decisions (incident_id)",
        r#"CREATE TABLE IF NOT EXISTS deployment_events (
            id UUID PRIMARY KEY,
            service TEXT NOT NULL,
            env TEXT NOT NULL,
            deployed_at TIMESTAMPTZ NOT NULL,
            version TEXT,
            git_sha TEXT,
            actor TEXT,
            source TEXT,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_deployment_events_scope ON deployment_events (service, env, deployed_at DESC)",
        r#"CREATE TABLE IF NOT EXISTS config_changes (
            id UUID PRIMARY KEY,
            service TEXT NOT NULL,
            env TEXT NOT NULL,
            changed_at TIMESTAMPTZ NOT NULL,
            actor TEXT,
            diff JSONB NOT NULL DEFAULT '{}'::jsonb,
            source TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_config_changes_scope ON config_changes (service, env, changed_at DESC)",
        r#"CREATE TABLE IF NOT EXISTS incident_feedback (
            id UUID PRIMARY KEY,
            incident_id UUID NOT NULL REFERENCES incidents(id),
            helpful BOOLEAN,
            correct BOOLEAN,
            final_rca TEXT,
            notes TEXT,
            created_by TEXT NOT NULL DEFAULT 'unknown',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS audit_logs (
            id UUID PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT,
            details JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs (created_at DESC)",
        r#"CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            incident_id UUID,
            stage TEXT NOT NULL,
            status TEXT NOT NULL,
            duration_ms BIGINT NOT NULL DEFAULT 0,
            error TEXT,
            metrics JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_created ON pipeline_runs (created_at DESC)",
        r#"CREATE TABLE IF NOT EXISTS triage_jobs (
            id UUID PRIMARY KEY,
            incident_id UUID NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INT NOT NULL DEFAULT 0,
            max_retries INT NOT NULL DEFAULT 3,
            next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            claimed_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_triage_jobs_pending ON triage_jobs (status, next_attempt_at)",
        // Additive compatibility columns for rows created by older schemas
        "ALTER TABLE alert_events ADD COLUMN IF NOT EXISTS correlation_id TEXT",
        "ALTER TABLE incidents ADD COLUMN IF NOT EXISTS correlation_id TEXT",
        "ALTER TABLE incidents ADD COLUMN IF NOT EXISTS service_version TEXT",
        "ALTER TABLE incidents ADD COLUMN IF NOT EXISTS git_sha TEXT",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Schema up to date");
    Ok(())
}
