#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod background_job;
mod backoff;
mod dispatcher;
mod errors;
mod job_registry;
mod runner;
/// Database schema definitions.
pub mod schema;
mod storage;
mod util;
mod worker;

/// The main trait for defining background jobs.
pub use self::background_job::BackgroundJob;
/// Untyped producer-facing enqueue, usable inside a producer transaction.
pub use self::background_job::enqueue;
/// Exponential backoff policy for retries.
pub use self::backoff::{backoff, MAX_ATTEMPTS};
/// The dispatcher that claims and executes eligible jobs.
pub use self::dispatcher::Dispatcher;
/// Error types for enqueueing and handler execution.
pub use self::errors::{EnqueueError, JobError};
/// The runner that orchestrates worker loops.
pub use self::runner::{RunHandle, Runner, ShutdownHandle};
/// Storage helpers for setup, observability, and administration.
pub use self::storage::{failed_job_count, pending_job_count, requeue_failed_job, setup_database};
