use crate::dispatcher::Dispatcher;
use crate::job_registry::JobRegistry;
use crate::worker::Worker;
use crate::BackgroundJob;
use futures_util::future::join_all;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);
const DEFAULT_MAX_JOBS_PER_TICK: i64 = 50;

/// The core runner responsible for claiming and running jobs.
///
/// Built once at startup: register the job types, tune the polling
/// parameters, then [`start`](Runner::start) the workers.
pub struct Runner<Context: Clone + Send + Sync + 'static> {
    connection_pool: PgPool,
    registry: JobRegistry<Context>,
    context: Context,
    num_workers: usize,
    poll_interval: Duration,
    jitter: Duration,
    max_jobs_per_tick: i64,
    shutdown_when_queue_empty: bool,
}

impl<Context: std::fmt::Debug + Clone + Sync + Send + 'static> std::fmt::Debug for Runner<Context> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("context", &self.context)
            .field("num_workers", &self.num_workers)
            .field("poll_interval", &self.poll_interval)
            .field("max_jobs_per_tick", &self.max_jobs_per_tick)
            .field("shutdown_when_queue_empty", &self.shutdown_when_queue_empty)
            .finish()
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context> {
    /// Create a new runner with the given connection pool and context.
    pub fn new(connection_pool: PgPool, context: Context) -> Self {
        Self {
            connection_pool,
            registry: JobRegistry::default(),
            context,
            num_workers: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
            max_jobs_per_tick: DEFAULT_MAX_JOBS_PER_TICK,
            shutdown_when_queue_empty: false,
        }
    }

    /// Register a job type with this runner.
    ///
    /// Jobs of unregistered types are failed at dispatch time, so every
    /// type the producers enqueue must be registered here.
    pub fn register<J: BackgroundJob<Context = Context>>(mut self) -> Self {
        self.registry.register::<J>();
        self
    }

    /// Set the number of concurrent workers (default: 1).
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the idle wait between ticks when no work was found (default: 2s).
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum random jitter added to idle waits (default: 100ms).
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the upper bound on jobs claimed per tick (default: 50).
    pub fn max_jobs_per_tick(mut self, max_jobs: i64) -> Self {
        self.max_jobs_per_tick = max_jobs;
        self
    }

    /// Set the runner to shut down once no eligible jobs remain.
    ///
    /// Useful for drain-style invocations and tests; a long-running worker
    /// process leaves this off and polls forever.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }

    /// Build a dispatcher sharing this runner's registry and context.
    ///
    /// This is the single-tick interface: calling
    /// [`run_once`](Dispatcher::run_once) drives exactly one batch without
    /// any polling loop around it.
    pub fn dispatcher(&self) -> Dispatcher<Context> {
        Dispatcher {
            pool: self.connection_pool.clone(),
            registry: Arc::new(self.registry.clone()),
            context: self.context.clone(),
        }
    }

    /// Start the background workers.
    ///
    /// This returns a [`RunHandle`] which can be used to trigger a graceful
    /// shutdown and to wait for the workers to finish.
    pub fn start(&self) -> RunHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(self.registry.clone());

        let mut handles = Vec::new();
        for i in 1..=self.num_workers {
            let name = format!("outbox-worker-{i}");
            info!(worker.name = %name, "Starting worker…");

            let worker = Worker {
                dispatcher: Dispatcher {
                    pool: self.connection_pool.clone(),
                    registry: registry.clone(),
                    context: self.context.clone(),
                },
                poll_interval: self.poll_interval,
                jitter: self.jitter,
                max_jobs_per_tick: self.max_jobs_per_tick,
                shutdown_when_queue_empty: self.shutdown_when_queue_empty,
                shutdown_tx: shutdown_tx.clone(),
                shutdown_rx: shutdown_rx.clone(),
            };

            let span = info_span!("worker", worker.name = %name);
            let handle = tokio::spawn(async move { worker.run().instrument(span).await });

            handles.push(handle);
        }

        RunHandle {
            handles,
            shutdown_tx,
        }
    }
}

/// Handle to a running set of workers.
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RunHandle {
    /// A cloneable trigger for requesting shutdown from elsewhere, e.g. a
    /// signal handler task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Request a graceful shutdown: each worker finishes its in-flight
    /// batch and then exits.
    pub fn shutdown(&self) {
        ShutdownHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
        .shutdown();
    }

    /// Wait for all workers to shut down.
    ///
    /// Returns an error if any worker terminated with a fatal error, so the
    /// process can exit non-zero for its supervisor.
    pub async fn wait_for_shutdown(self) -> anyhow::Result<()> {
        let mut first_error = None;

        for result in join_all(self.handles).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                }
                Err(error) => {
                    warn!(%error, "Worker task panicked");
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}

/// Cloneable trigger for gracefully shutting down a running [`RunHandle`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request a graceful shutdown of all workers.
    pub fn shutdown(&self) {
        // Fails only if every worker already exited, which is fine.
        let _ = self.shutdown_tx.send(true);
    }
}
