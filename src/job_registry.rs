use crate::errors::JobError;
use crate::BackgroundJob;
use anyhow::anyhow;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased job execution function: deserializes the payload and runs
/// the job with the shared context.
pub(crate) type RunTaskFn<Context> =
    Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Static mapping from job type to its execution function.
///
/// Populated once while configuring the [`crate::Runner`] and never mutated
/// afterwards, so at dispatch time it behaves like a constant lookup table.
pub(crate) struct JobRegistry<Context> {
    job_runners: HashMap<&'static str, RunTaskFn<Context>>,
}

impl<Context> Default for JobRegistry<Context> {
    fn default() -> Self {
        Self {
            job_runners: HashMap::new(),
        }
    }
}

impl<Context> Clone for JobRegistry<Context> {
    fn clone(&self) -> Self {
        Self {
            job_runners: self.job_runners.clone(),
        }
    }
}

impl<Context: Clone + Send + 'static> JobRegistry<Context> {
    pub(crate) fn register<J: BackgroundJob<Context = Context>>(&mut self) {
        self.job_runners.insert(J::JOB_TYPE, Arc::new(runnable::<J>));
    }

    pub(crate) fn get(&self, job_type: &str) -> Option<&RunTaskFn<Context>> {
        self.job_runners.get(job_type)
    }

    #[cfg(test)]
    pub(crate) fn job_types(&self) -> Vec<&'static str> {
        self.job_runners.keys().copied().collect()
    }
}

fn runnable<J: BackgroundJob>(ctx: J::Context, payload: Value) -> BoxFuture<'static, Result<(), JobError>> {
    async move {
        // A payload that no longer deserializes will not fix itself on
        // retry; fail the job outright.
        let job: J = serde_json::from_value(payload).map_err(|err| {
            JobError::Permanent(anyhow!("failed to deserialize payload for {}: {err}", J::JOB_TYPE))
        })?;
        job.run(ctx).await
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct NoopJob;

    impl BackgroundJob for NoopJob {
        const JOB_TYPE: &'static str = "noop";
        type Context = ();

        fn dedup_key(&self) -> String {
            "noop".into()
        }

        async fn run(&self, _ctx: Self::Context) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn registered_types_are_resolvable() {
        let mut registry = JobRegistry::<()>::default();
        registry.register::<NoopJob>();

        assert!(registry.get("noop").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.job_types(), vec!["noop"]);
    }

    #[tokio::test]
    async fn undeserializable_payload_is_a_permanent_error() {
        let mut registry = JobRegistry::<()>::default();
        registry.register::<NoopJob>();

        let run_fn = registry.get("noop").unwrap();
        let result = run_fn((), serde_json::json!(["not", "a", "noop"])).await;
        assert!(matches!(result, Err(JobError::Permanent(_))));
    }
}
