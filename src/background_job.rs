use crate::errors::{EnqueueError, JobError};
use crate::schema::OutboxJob;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use std::future::Future;
use tracing::instrument;

/// Trait for defining background jobs that can be enqueued and executed
/// asynchronously.
pub trait BackgroundJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the job type.
    ///
    /// This MUST be unique for the whole application.
    const JOB_TYPE: &'static str;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + 'static;

    /// The deduplication key identifying this logical unit of work.
    ///
    /// Must be stable and unique per logical event (typically composed from
    /// the identifying fields of the domain entity, e.g.
    /// `"timesheet:day_saved:123:2025-03-15"`). Enqueueing the same key
    /// twice stores only one record.
    fn dedup_key(&self) -> String;

    /// Execute the job.
    ///
    /// Delivery is at-least-once: this may run more than once for the same
    /// job (for example after a crash between the side effect and the
    /// status update), so the implementation must be idempotent — check
    /// current state and apply, rather than blindly append.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = Result<(), JobError>> + Send;

    /// Enqueue this job for background execution.
    ///
    /// Returns the stored job record. If a job with the same dedup key
    /// already exists, that existing record is returned unchanged.
    #[instrument(name = "outbox.enqueue", skip(self, pool), fields(job.job_type = Self::JOB_TYPE))]
    fn enqueue<'a>(&'a self, pool: &'a PgPool) -> BoxFuture<'a, Result<OutboxJob, EnqueueError>> {
        let payload = match serde_json::to_value(self) {
            Ok(payload) => payload,
            Err(err) => return async move { Err(EnqueueError::Serialization(err)) }.boxed(),
        };
        let dedup_key = self.dedup_key();

        async move { enqueue(pool, Self::JOB_TYPE, &dedup_key, payload).await }.boxed()
    }
}

/// Enqueue a job by raw type name, dedup key, and payload.
///
/// This is the producer-facing primitive underneath
/// [`BackgroundJob::enqueue`]. It is generic over the executor so producers
/// can call it inside the same transaction as the domain write that
/// triggered it, making the job record and the domain change durable
/// together or not at all.
///
/// Idempotent: if a job with `dedup_key` already exists, the existing
/// record is returned and the payload is NOT overwritten, even if it
/// differs. Idempotent commands are expected to carry identical payloads
/// for the same key.
pub async fn enqueue<'e>(
    executor: impl PgExecutor<'e>,
    job_type: &str,
    dedup_key: &str,
    payload: Value,
) -> Result<OutboxJob, EnqueueError> {
    if job_type.is_empty() {
        return Err(EnqueueError::EmptyIdentifier("job_type"));
    }
    if dedup_key.is_empty() {
        return Err(EnqueueError::EmptyIdentifier("dedup_key"));
    }

    // Identity-update upsert: on a dedup-key conflict the update writes the
    // key back to itself, leaving payload and state untouched, and RETURNING
    // yields the surviving row. Unlike DO NOTHING plus a fallback select,
    // this also returns the row when a concurrent producer commits the same
    // key mid-statement, since the conflict arbitration waits out the other
    // transaction instead of consulting the statement snapshot.
    let job = sqlx::query_as::<_, OutboxJob>(
        r"
        INSERT INTO outbox_jobs (job_type, dedup_key, payload)
        VALUES ($1, $2, $3)
        ON CONFLICT (dedup_key) DO UPDATE SET dedup_key = EXCLUDED.dedup_key
        RETURNING id, job_type, dedup_key, payload, status, attempts,
                  run_after, last_error, created_at, updated_at
        ",
    )
    .bind(job_type)
    .bind(dedup_key)
    .bind(payload)
    .fetch_one(executor)
    .await?;

    Ok(job)
}
