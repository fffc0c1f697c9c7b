//! Triage job queue — PostgreSQL-backed async work queue.
//!
//! Jobs are claimed with `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent
//! workers never take the same row, and each worker runs a single job per
//! tick (prefetch=1). Delivery is at-least-once; the runner's idempotence
//! gate makes repeats safe.

use crate::triage::run_triage;
use crate::AppState;
use rand::Rng;
use sqlx::PgConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A claimed triage job ready for processing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TriageJob {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub retry_count: i32,
    pub max_retries: i32,
}

/// Enqueue a triage task for an incident.
pub async fn enqueue_triage(
    conn: &mut PgConnection,
    incident_id: Uuid,
    max_retries: i32,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO triage_jobs (id, incident_id, max_retries) VALUES ($1, $2, $3)",
    )
    .bind(id)
    .bind(incident_id)
    .bind(max_retries)
    .execute(conn)
    .await?;
    Ok(id)
}

/// Atomically claim the next due job, or `None` when the queue is empty.
pub async fn claim_due_job(conn: &mut PgConnection) -> Result<Option<TriageJob>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE triage_jobs
        SET    status = 'running',
               claimed_at = NOW()
        WHERE  id = (
            SELECT id
            FROM   triage_jobs
            WHERE  status = 'pending'
              AND  next_attempt_at <= NOW()
            ORDER  BY created_at ASC
            LIMIT  1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, incident_id, retry_count, max_retries
        "#,
    )
    .fetch_optional(conn)
    .await
}

pub async fn complete_job(conn: &mut PgConnection, job: &TriageJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE triage_jobs SET status = 'done', completed_at = NOW() WHERE id = $1",
    )
    .bind(job.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Mark a job failed. Requeues with exponential backoff until retries are
/// exhausted, then parks it as `'failed'` for audit.
pub async fn fail_job(
    conn: &mut PgConnection,
    job: &TriageJob,
    error: &str,
    backoff_seconds: i64,
    jitter: bool,
) -> Result<(), sqlx::Error> {
    let next_retry = job.retry_count + 1;
    let exhausted = next_retry >= job.max_retries;
    let new_status = if exhausted { "failed" } else { "pending" };

    if exhausted {
        warn!(
            job_id = %job.id,
            incident_id = %job.incident_id,
            retries = next_retry,
            "Triage job permanently failed after {} attempts",
            next_retry
        );
    }

    let delay = backoff_delay_seconds(backoff_seconds, job.retry_count, jitter);
    sqlx::query(
        r#"UPDATE triage_jobs
           SET status          = $1,
               retry_count     = $2,
               last_error      = $3,
               next_attempt_at = NOW() + make_interval(secs => $4),
               completed_at    = CASE WHEN $5 THEN NOW() ELSE NULL END,
               claimed_at      = NULL
           WHERE id = $6"#,
    )
    .bind(new_status)
    .bind(next_retry)
    .bind(error)
    .bind(delay as f64)
    .bind(exhausted)
    .bind(job.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Exponential backoff, capped at 2^6 doublings, with optional jitter of up
/// to one base interval.
pub fn backoff_delay_seconds(backoff_seconds: i64, retry_count: i32, jitter: bool) -> i64 {
    let exponent = retry_count.clamp(0, 6) as u32;
    let mut delay = backoff_seconds.max(1).saturating_mul(1_i64 << exponent);
    if jitter {
        delay += rand::thread_rng().gen_range(0..=backoff_seconds.max(1));
    }
    delay
}

/// Run the triage worker as a long-lived background task.
///
/// Polls the queue on an interval, claims one job, drives the runner, and
/// records the retry outcome. Loops until the runtime shuts down.
pub async fn run_worker(state: Arc<AppState>) {
    let poll = state.settings.worker_poll_interval_secs.max(1);
    info!(poll_interval_secs = poll, "Triage worker started");

    let mut interval = tokio::time::interval(Duration::from_secs(poll));
    // Don't try to "catch up" missed ticks when a run overshoots the tick.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match process_one(&state).await {
            Ok(Some(incident_id)) => {
                debug!(incident_id = %incident_id, "Triage job processed");
            }
            Ok(None) => {}
            Err(error) => {
                error!(error = %error, "Triage worker error");
            }
        }
    }
}

/// Claim and process one job. Returns the incident id when a job ran.
pub async fn process_one(state: &Arc<AppState>) -> anyhow::Result<Option<Uuid>> {
    let job = {
        let mut conn = state.db.acquire().await?;
        claim_due_job(&mut conn).await?
    };
    let Some(job) = job else {
        return Ok(None);
    };

    info!(
        job_id = %job.id,
        incident_id = %job.incident_id,
        retry = job.retry_count,
        "Claimed triage job"
    );

    let outcome = run_triage(state, job.incident_id).await;
    let mut conn = state.db.acquire().await?;
    match outcome {
        Ok(()) => complete_job(&mut conn, &job).await?,
        Err(error) => {
            fail_job(
                &mut conn,
                &job,
                &error.to_string(),
                state.settings.retry_backoff_seconds,
                state.settings.retry_jitter,
            )
            .await?;
        }
    }
    Ok(Some(job.incident_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_retry() {
        assert_eq!(backoff_delay_seconds(5, 0, false), 5);
        assert_eq!(backoff_delay_seconds(5, 1, false), 10);
        assert_eq!(backoff_delay_seconds(5, 3, false), 40);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay_seconds(5, 100, false), 5 * 64);
    }

    #[test]
    fn test_jitter_stays_within_one_base_interval() {
        for _ in 0..20 {
            let delay = backoff_delay_seconds(5, 0, true);
            assert!((5..=10).contains(&delay));
        }
    }
}
