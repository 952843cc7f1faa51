use crate::backoff::{backoff, MAX_ATTEMPTS};
use crate::errors::JobError;
use crate::job_registry::JobRegistry;
use crate::schema::OutboxJob;
use crate::storage;
use crate::util::try_to_extract_panic_info;
use chrono::Utc;
use futures_util::FutureExt;
use sqlx::PgPool;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Selects eligible jobs, claims them atomically, and executes their
/// handlers, recording the outcome as a persisted state transition.
///
/// Safe to run from any number of workers or processes concurrently: the
/// claim is a single conditional update, and a lost claim race is a normal
/// no-op skip.
pub struct Dispatcher<Context> {
    pub(crate) pool: PgPool,
    pub(crate) registry: Arc<JobRegistry<Context>>,
    pub(crate) context: Context,
}

impl<Context> Clone for Dispatcher<Context>
where
    Context: Clone,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            context: self.context.clone(),
        }
    }
}

impl<Context: Clone + Send + Sync + 'static> Dispatcher<Context> {
    /// Run one dispatch tick: claim and execute up to `max_jobs` eligible
    /// jobs, sequentially, oldest first.
    ///
    /// Returns the number of jobs claimed by this call, regardless of each
    /// job's individual outcome. Handler failures never propagate out of
    /// here; only database errors do.
    pub async fn run_once(&self, max_jobs: i64) -> Result<usize, sqlx::Error> {
        let candidates = storage::find_eligible_jobs(&self.pool, max_jobs).await?;
        if candidates.is_empty() {
            trace!("No eligible jobs to process");
            return Ok(0);
        }

        let mut processed = 0;
        for candidate in candidates {
            // Another worker may have claimed it since the select.
            let Some(job) = storage::claim_job(&self.pool, candidate.id).await? else {
                debug!(job.id = candidate.id, "Job already claimed by another worker, skipping");
                continue;
            };

            processed += 1;

            let span = info_span!("job", job.id = %job.id, job.job_type = %job.job_type);
            self.execute(job).instrument(span).await?;
        }

        Ok(processed)
    }

    /// Execute a claimed job and persist the resulting state transition.
    async fn execute(&self, job: OutboxJob) -> Result<(), sqlx::Error> {
        let Some(run_task_fn) = self.registry.get(&job.job_type) else {
            // Deployment mismatch between enqueueing and handler-registering
            // code. Retrying cannot fix it, so the job fails immediately
            // without consuming the transient retry budget.
            error!(
                job.job_type = %job.job_type,
                "No handler registered for job type, failing job"
            );
            let message = format!("unknown job type: {}", job.job_type);
            return storage::mark_job_failed(&self.pool, job.id, job.attempts, &message).await;
        };

        debug!(job.attempts = job.attempts, "Running job…");

        let future = run_task_fn(self.context.clone(), job.payload.clone());
        let result = AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .map_err(|panic| JobError::Retryable(try_to_extract_panic_info(&*panic)))
            .and_then(std::convert::identity);

        match result {
            Ok(()) => {
                info!("Job completed successfully");
                storage::mark_job_done(&self.pool, job.id).await
            }
            Err(JobError::Permanent(error)) => {
                let attempts = job.attempts + 1;
                error!(%error, "Job failed permanently");
                storage::mark_job_failed(&self.pool, job.id, attempts, &format!("{error:#}")).await
            }
            Err(JobError::Retryable(error)) => {
                let attempts = job.attempts + 1;
                let message = format!("{error:#}");

                if attempts >= MAX_ATTEMPTS {
                    error!(
                        %error,
                        job.attempts = attempts,
                        "Job failed, retries exhausted"
                    );
                    storage::mark_job_failed(&self.pool, job.id, attempts, &message).await
                } else {
                    let delay = backoff(attempts as u32);
                    let run_after = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
                    warn!(
                        %error,
                        job.attempts = attempts,
                        retry.delay_secs = delay.as_secs(),
                        "Job failed, scheduling retry"
                    );
                    storage::schedule_retry(&self.pool, job.id, attempts, run_after, &message).await
                }
            }
        }
    }
}
