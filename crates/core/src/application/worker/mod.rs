// Worker - claim and execute loop

pub mod constants;
mod shutdown;

pub use shutdown::{stop_channel, StopHandle, StopToken};

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info};

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::Job;
use crate::error::{QueueError, Result};
use crate::port::handler::HandlerError;
use crate::port::{ErrorObserver, HandlerRegistry, JobHandler, JobStore, TimeProvider};
use constants::ERROR_RECOVERY_SLEEP;

/// The consumer's polling loop.
///
/// Claims due jobs and runs their handlers until told to stop. Nothing in
/// here propagates: infrastructure failures go to the error observer and
/// the loop keeps polling. Stopping is graceful, claimed jobs run to
/// completion and their outcomes are persisted before `run` returns.
pub struct WorkerLoop {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    observer: Arc<dyn ErrorObserver>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: Arc<RetryPolicy>,
    poll_interval: std::time::Duration,
    concurrency: usize,
}

impl WorkerLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        observer: Arc<dyn ErrorObserver>,
        time_provider: Arc<dyn TimeProvider>,
        retry_policy: Arc<RetryPolicy>,
        poll_interval: std::time::Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            handlers,
            observer,
            time_provider,
            retry_policy,
            poll_interval,
            concurrency: concurrency.max(1),
        }
    }

    /// Poll until stopped, then drain in-flight executions.
    pub async fn run(&self, mut stop: StopToken) {
        info!(concurrency = %self.concurrency, "worker loop started");
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if stop.is_stopped() {
                break;
            }

            // Reap finished executions; their outcomes were persisted by
            // the execution task itself.
            while in_flight.try_join_next().is_some() {}

            if in_flight.len() >= self.concurrency {
                tokio::select! {
                    _ = in_flight.join_next() => {}
                    _ = stop.stopped() => break,
                }
                continue;
            }

            let now = self.time_provider.now_millis();
            match self.store.claim_due(now).await {
                Ok(Some(job)) => match self.handlers.get(job.name.as_str()) {
                    Some(handler) => {
                        in_flight.spawn(Self::execute_one(
                            Arc::clone(&self.store),
                            handler,
                            Arc::clone(&self.observer),
                            Arc::clone(&self.time_provider),
                            Arc::clone(&self.retry_policy),
                            job,
                        ));
                    }
                    None => {
                        self.observer.report(
                            "dispatch",
                            &QueueError::Config(format!(
                                "no handler registered for job '{}'",
                                job.name
                            )),
                        );
                        if let Err(e) = self.store.release(job.id).await {
                            self.observer.report("release claim", &e);
                        }
                        // Back off a full poll so the same row does not spin
                        // the loop.
                        tokio::select! {
                            _ = sleep(self.poll_interval) => {}
                            _ = stop.stopped() => break,
                        }
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        _ = sleep(self.poll_interval) => {}
                        _ = stop.stopped() => break,
                    }
                }
                Err(e) => {
                    self.observer.report("claim due job", &e);
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP) => {}
                        _ = stop.stopped() => break,
                    }
                }
            }
        }

        // Drain: in-flight handlers finish, outcomes land in the store.
        while in_flight.join_next().await.is_some() {}
        info!("worker loop stopped");
    }

    /// Run one claimed job end to end: handler, outcome transition, persist.
    async fn execute_one(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        observer: Arc<dyn ErrorObserver>,
        time_provider: Arc<dyn TimeProvider>,
        retry_policy: Arc<RetryPolicy>,
        job: Job,
    ) {
        info!(job_id = %job.id, job_name = %job.name, attempt = %job.attempts, "job claimed");

        // Handlers run in their own task so a panic is contained by the
        // JoinHandle instead of unwinding through the loop.
        let job_arc = Arc::new(job);
        let job_for_handler = Arc::clone(&job_arc);
        let handle = tokio::task::spawn(async move { handler.handle(&job_for_handler).await });
        let outcome = handle.await;

        let mut job = Arc::try_unwrap(job_arc).unwrap_or_else(|arc| (*arc).clone());
        let now = time_provider.now_millis();

        let persisted = match outcome {
            Ok(Ok(())) => Self::settle_success(&store, &mut job, now).await,
            Ok(Err(handler_err)) => {
                Self::settle_failure(&store, &retry_policy, &mut job, now, handler_err).await
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    format!("{:?}", join_err)
                } else {
                    "handler task cancelled".to_string()
                };
                error!(job_id = %job.id, "handler panicked: {}", reason);
                Self::settle_failure(
                    &store,
                    &retry_policy,
                    &mut job,
                    now,
                    HandlerError::Panicked(reason),
                )
                .await
            }
        };

        if let Err(e) = persisted {
            observer.report("persist job outcome", &e);
        }
    }

    async fn settle_success(store: &Arc<dyn JobStore>, job: &mut Job, now: i64) -> Result<()> {
        job.complete(now)?;
        info!(job_id = %job.id, "job done");
        store.update(job).await
    }

    async fn settle_failure(
        store: &Arc<dyn JobStore>,
        retry_policy: &RetryPolicy,
        job: &mut Job,
        now: i64,
        handler_err: HandlerError,
    ) -> Result<()> {
        match retry_policy.decide(job, now) {
            RetryDecision::Retry { run_at } => {
                job.requeue(run_at, handler_err.to_string());
                store.update(job).await
            }
            RetryDecision::Failed => {
                error!(job_id = %job.id, error = %handler_err, "job failed");
                job.fail(now, handler_err.to_string());
                store.update(job).await
            }
        }
    }
}
