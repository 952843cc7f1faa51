//! Standalone worker process for the outbox job table.
//!
//! Polls for eligible jobs, executes their registered handlers, and keeps
//! going until it receives SIGTERM or SIGINT, at which point it finishes
//! the in-flight batch and exits with status 0. Fatal errors (e.g. loss of
//! database connectivity) terminate the process with a non-zero status so
//! an external supervisor can restart it.

use anyhow::Context as _;
use clap::Parser;
use outbox_workers::{setup_database, BackgroundJob, JobError, Runner};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Outbox worker: processes deferred jobs from the outbox_jobs table.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Idle wait between ticks when no work was found (seconds)
    #[arg(long, default_value_t = 2.0)]
    poll_seconds: f64,

    /// Upper bound on jobs claimed per tick
    #[arg(long, default_value_t = 50)]
    max_jobs: i64,

    /// Number of concurrent workers in this process
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Database URL (falls back to the DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

/// Notification job: delivers an email for a domain event.
///
/// The delivery itself is still a placeholder; the handler only logs the
/// payload, which is enough to exercise the full enqueue/claim/retry
/// machinery end to end.
#[derive(Serialize, Deserialize)]
struct EmailNotify {
    notification_id: i64,
    to: String,
    subject: Option<String>,
}

impl BackgroundJob for EmailNotify {
    const JOB_TYPE: &'static str = "EMAIL_NOTIFY";
    type Context = ();

    // Keyed by the notification, not the address: the same recipient must
    // still get a fresh job for each new event.
    fn dedup_key(&self) -> String {
        format!("notify:{}", self.notification_id)
    }

    async fn run(&self, _ctx: Self::Context) -> Result<(), JobError> {
        info!(email.to = %self.to, email.subject = ?self.subject, "Delivering notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_distinguishes_notifications_to_the_same_address() {
        let first = EmailNotify {
            notification_id: 42,
            to: "a@x".into(),
            subject: None,
        };
        let second = EmailNotify {
            notification_id: 43,
            to: "a@x".into(),
            subject: None,
        };

        assert_eq!(first.dedup_key(), "notify:42");
        assert_ne!(first.dedup_key(), second.dedup_key());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let pool = PgPoolOptions::new()
        .max_connections(args.workers as u32 + 1)
        .connect(&args.database_url)
        .await
        .context("failed to connect to the database")?;

    setup_database(&pool)
        .await
        .context("failed to run database migrations")?;

    info!(
        poll_seconds = args.poll_seconds,
        max_jobs = args.max_jobs,
        workers = args.workers,
        "Starting outbox worker"
    );

    let runner = Runner::new(pool, ())
        .register::<EmailNotify>()
        .num_workers(args.workers)
        .poll_interval(Duration::from_secs_f64(args.poll_seconds))
        .max_jobs_per_tick(args.max_jobs);

    let handle = runner.start();

    let shutdown = handle.shutdown_handle();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully…"),
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("SIGINT received, shutting down gracefully…");
                }
            }
        }

        shutdown.shutdown();
    });

    handle.wait_for_shutdown().await?;

    info!("Outbox worker stopped");
    Ok(())
}
