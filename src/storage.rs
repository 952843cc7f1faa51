use crate::schema::{JobStatus, OutboxJob};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const JOB_COLUMNS: &str = "id, job_type, dedup_key, payload, status, attempts, \
                           run_after, last_error, created_at, updated_at";

/// Create the outbox tables by running the embedded migrations.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Finds jobs that are eligible for execution, oldest first.
///
/// Eligible means `PENDING` with `run_after` in the past. The rows returned
/// here are only candidates; each still has to be claimed individually.
pub(crate) async fn find_eligible_jobs(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<OutboxJob>, sqlx::Error> {
    sqlx::query_as::<_, OutboxJob>(&format!(
        r"
        SELECT {JOB_COLUMNS}
        FROM outbox_jobs
        WHERE status = $1 AND run_after <= NOW()
        ORDER BY run_after ASC
        LIMIT $2
        ",
    ))
    .bind(JobStatus::Pending)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Atomically claims a job for execution (`PENDING` -> `RUNNING`).
///
/// The transition is a single conditional update, so two workers racing on
/// the same row can never both hold the claim: exactly one update matches.
/// Returns the fresh row on success, or `None` if another worker got there
/// first (or the job is no longer pending at all).
pub(crate) async fn claim_job(pool: &PgPool, job_id: i64) -> Result<Option<OutboxJob>, sqlx::Error> {
    sqlx::query_as::<_, OutboxJob>(&format!(
        r"
        UPDATE outbox_jobs
        SET status = $1, updated_at = NOW()
        WHERE id = $2 AND status = $3
        RETURNING {JOB_COLUMNS}
        ",
    ))
    .bind(JobStatus::Running)
    .bind(job_id)
    .bind(JobStatus::Pending)
    .fetch_optional(pool)
    .await
}

/// Marks a claimed job as successfully completed.
pub(crate) async fn mark_job_done(pool: &PgPool, job_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE outbox_jobs SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(JobStatus::Done)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Marks a claimed job as permanently failed.
pub(crate) async fn mark_job_failed(
    pool: &PgPool,
    job_id: i64,
    attempts: i32,
    last_error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        UPDATE outbox_jobs
        SET status = $1, attempts = $2, last_error = $3, updated_at = NOW()
        WHERE id = $4
        ",
    )
    .bind(JobStatus::Failed)
    .bind(attempts)
    .bind(last_error)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns a claimed job to `PENDING` for a later retry.
pub(crate) async fn schedule_retry(
    pool: &PgPool,
    job_id: i64,
    attempts: i32,
    run_after: DateTime<Utc>,
    last_error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        UPDATE outbox_jobs
        SET status = $1, attempts = $2, run_after = $3, last_error = $4, updated_at = NOW()
        WHERE id = $5
        ",
    )
    .bind(JobStatus::Pending)
    .bind(attempts)
    .bind(run_after)
    .bind(last_error)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The number of jobs waiting to run (including future-scheduled retries).
pub async fn pending_job_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM outbox_jobs WHERE status = $1")
        .bind(JobStatus::Pending)
        .fetch_one(pool)
        .await
}

/// The number of jobs that have failed permanently.
pub async fn failed_job_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM outbox_jobs WHERE status = $1")
        .bind(JobStatus::Failed)
        .fetch_one(pool)
        .await
}

/// Requeues a permanently failed job, as a deliberate administrative action.
///
/// Resets the job to `PENDING` with a fresh attempt budget and immediate
/// eligibility. The update is conditional on the job still being `FAILED`,
/// so it cannot disturb a job in any other state. Returns whether the job
/// was requeued.
pub async fn requeue_failed_job(pool: &PgPool, job_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r"
        UPDATE outbox_jobs
        SET status = $1, attempts = 0, last_error = NULL, run_after = NOW(), updated_at = NOW()
        WHERE id = $2 AND status = $3
        ",
    )
    .bind(JobStatus::Pending)
    .bind(job_id)
    .bind(JobStatus::Failed)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
