//! Database schema definitions for SQLx.
//!
//! This module contains the database types and structures for the outbox
//! job table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

/// Lifecycle state of an outbox job.
///
/// `Done` and `Failed` are terminal; no field of a job mutates after it
/// reaches either. While a job is `Running`, exactly one worker holds the
/// claim on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Waiting to be claimed once `run_after` has passed.
    Pending,
    /// Claimed by a worker and currently executing.
    Running,
    /// Handler completed successfully.
    Done,
    /// Retries exhausted, or the failure was permanent.
    Failed,
}

/// Represents one unit of deferred work in the `outbox_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxJob {
    /// Unique identifier for the job, assigned at creation.
    pub id: i64,
    /// Type identifier for the job (used for dispatch).
    pub job_type: String,
    /// Caller-supplied key making enqueue idempotent; unique across all jobs.
    pub dedup_key: String,
    /// JSON data containing the job payload.
    pub payload: Value,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Number of failed execution attempts so far. Only ever increases.
    pub attempts: i32,
    /// The job is eligible for execution only once this time has passed.
    pub run_after: DateTime<Utc>,
    /// The most recent failure description, if any.
    pub last_error: Option<String>,
    /// Timestamp when the job was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last state change.
    pub updated_at: DateTime<Utc>,
}
