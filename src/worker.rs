use crate::dispatcher::Dispatcher;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, trace};

/// Ticks that may fail in a row before the worker gives up and exits.
///
/// Covers breakage that never surfaces as an immediately-fatal error kind,
/// e.g. a pool that only ever reports acquire timeouts because the
/// database behind it is gone.
const MAX_CONSECUTIVE_TICK_FAILURES: u32 = 5;

pub(crate) struct Worker<Context> {
    pub(crate) dispatcher: Dispatcher<Context>,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
    pub(crate) max_jobs_per_tick: i64,
    pub(crate) shutdown_when_queue_empty: bool,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Calculate the sleep duration with random jitter applied.
    ///
    /// Jitter reduces thundering-herd effects when several workers poll an
    /// empty table simultaneously.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }

        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Run dispatch ticks until shut down, or until the queue is empty if
    /// `shutdown_when_queue_empty` is set.
    ///
    /// The shutdown flag is only checked between ticks: an in-flight batch
    /// always runs to completion. Tick errors are logged and the loop
    /// continues, except for fatal infrastructure failures (loss of
    /// database connectivity), which propagate so the process can exit and
    /// be restarted by a supervisor.
    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        let mut consecutive_failures = 0u32;

        loop {
            if *self.shutdown_rx.borrow() {
                debug!("Shutdown requested, stopping worker after finished batch");
                break;
            }

            match self.dispatcher.run_once(self.max_jobs_per_tick).await {
                Ok(0) if self.shutdown_when_queue_empty => {
                    debug!("No pending jobs found. Shutting down the worker…");
                    break;
                }
                Ok(0) => {
                    consecutive_failures = 0;
                    let sleep_duration = self.sleep_duration_with_jitter();
                    trace!("No pending jobs found. Polling again in {sleep_duration:?}…");
                    self.idle_wait(sleep_duration).await;
                }
                Ok(processed) => {
                    consecutive_failures = 0;
                    trace!(tick.processed = processed, "Processed batch, polling again immediately");
                }
                Err(error) if is_fatal(&error) => {
                    error!(%error, "Fatal error while processing jobs, shutting down");
                    // Take the other workers down with us; the process is
                    // about to exit anyway.
                    let _ = self.shutdown_tx.send(true);
                    return Err(error.into());
                }
                Err(error) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_TICK_FAILURES {
                        error!(
                            %error,
                            tick.failures = consecutive_failures,
                            "Repeated tick failures, shutting down"
                        );
                        let _ = self.shutdown_tx.send(true);
                        return Err(error.into());
                    }

                    error!(%error, "Failed to process batch");
                    self.idle_wait(self.sleep_duration_with_jitter()).await;
                }
            }
        }

        Ok(())
    }

    /// Sleep for `duration`, waking early if shutdown is requested.
    async fn idle_wait(&mut self, duration: Duration) {
        tokio::select! {
            () = sleep(duration) => {}
            _ = self.shutdown_rx.changed() => {}
        }
    }
}

/// Whether a database error means the job store itself is unreachable.
///
/// Query-level errors are worth retrying on the next tick; these are not.
/// `PoolTimedOut` is not listed because a single acquire timeout can be
/// plain contention; if the pool stays unhealthy it shows up as repeated
/// tick failures, which the loop escalates on its own.
fn is_fatal(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
    )
}
