/// Error type for job enqueueing operations.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The job payload could not be serialized to JSON.
    #[error("failed to serialize job payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The `job_type` or `dedup_key` was empty.
    ///
    /// An empty dedup key would collapse unrelated jobs into one record, so
    /// it is rejected up front rather than stored.
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),

    /// The database rejected the insert.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Error returned by a job handler.
///
/// The variant decides what the dispatcher does with the job: retryable
/// failures go back to `PENDING` with backoff until the attempt budget is
/// exhausted, permanent failures skip the remaining retries and mark the
/// job `FAILED` immediately.
///
/// `anyhow::Error` converts into the retryable variant, so handlers built
/// on `anyhow` can use `?` directly and only need to reach for
/// [`JobError::permanent`] when they know retrying cannot help.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A transient failure; the job will be retried with backoff.
    #[error(transparent)]
    Retryable(#[from] anyhow::Error),

    /// A failure retrying will never fix; the job is failed immediately.
    #[error(transparent)]
    Permanent(anyhow::Error),
}

impl JobError {
    /// Wrap an error as a permanent, non-retryable failure.
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }
}
