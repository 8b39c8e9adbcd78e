// Job Queue - producer operations and consumer lifecycle

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::retry::RetryPolicy;
use crate::application::worker::{stop_channel, StopHandle, WorkerLoop};
use crate::config::QueueConfig;
use crate::domain::{Job, JobName, JobPayload};
use crate::error::{QueueError, Result};
use crate::port::handler::HandlerError;
use crate::port::{
    ErrorObserver, HandlerRegistry, JobStore, JobStoreProvider, LogErrorObserver, NewJob,
    SystemTimeProvider, TimeProvider,
};

/// Payload and scheduling input for one enqueue call.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub payload: serde_json::Value,
    /// Earliest execution time, epoch ms. Stored verbatim; defaults to now.
    pub run_at: Option<i64>,
}

impl EnqueueRequest {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            run_at: None,
        }
    }

    pub fn at(mut self, run_at: i64) -> Self {
        self.run_at = Some(run_at);
        self
    }
}

/// A live worker loop and the store it polls.
///
/// `stop` consumes the handle, so a runner cannot be stopped twice.
struct RunnerHandle {
    stop: StopHandle,
    task: JoinHandle<()>,
    store: Arc<dyn JobStore>,
}

impl RunnerHandle {
    async fn stop(self, observer: &Arc<dyn ErrorObserver>) {
        self.stop.stop();
        if let Err(join_err) = self.task.await {
            observer.report(
                "await runner task",
                &QueueError::Handler(HandlerError::Panicked(format!("{:?}", join_err))),
            );
        }
        if let Err(e) = self.store.close().await {
            observer.report("close consumer store", &e);
        }
    }
}

/// Desired consumer intents plus what is actually materialized.
#[derive(Default)]
struct ConsumerState {
    started: bool,
    paused: bool,
    handlers: Option<Arc<HandlerRegistry>>,
    runner: Option<RunnerHandle>,
}

impl ConsumerState {
    fn should_run(&self) -> bool {
        self.started && !self.paused
    }
}

/// The queue facade: enqueue on the producer side, a lifecycle-managed
/// worker loop on the consumer side, both against stores opened through
/// the injected provider.
///
/// All state is owned by the instance. The hosting process decides when to
/// stop; nothing in here installs signal handlers.
pub struct JobQueue {
    provider: Arc<dyn JobStoreProvider>,
    observer: Arc<dyn ErrorObserver>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: Arc<RetryPolicy>,
    config: QueueConfig,
    producer: Mutex<Option<Arc<dyn JobStore>>>,
    consumer: Mutex<ConsumerState>,
}

impl JobQueue {
    pub fn new(provider: Arc<dyn JobStoreProvider>, config: QueueConfig) -> Self {
        Self {
            provider,
            observer: Arc::new(LogErrorObserver),
            time_provider: Arc::new(SystemTimeProvider),
            retry_policy: Arc::new(RetryPolicy::default()),
            config,
            producer: Mutex::new(None),
            consumer: Mutex::new(ConsumerState::default()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: Arc<RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Eagerly establish the producer store (pool, probe, migrations).
    ///
    /// Optional: `enqueue` performs the same bootstrap lazily on first use.
    pub async fn connect_producer(&self) -> Result<()> {
        self.producer_store().await.map(|_| ())
    }

    /// Persist a job for execution at `run_at` (or now).
    ///
    /// Returns the stored job, id assigned. An error means the job was not
    /// submitted.
    pub async fn enqueue(&self, name: &str, request: EnqueueRequest) -> Result<Job> {
        let store = self.producer_store().await?;
        let now = self.time_provider.now_millis();
        let job = store
            .insert(NewJob {
                name: JobName::new(name),
                payload: JobPayload::new(request.payload),
                run_at: request.run_at.unwrap_or(now),
                priority: self.config.priority,
                max_attempts: self.config.max_attempts,
                created_at: now,
            })
            .await?;
        info!(job_id = %job.id, job_name = %name, run_at = %job.run_at, "job enqueued");
        Ok(job)
    }

    /// Close the producer store if one was ever opened.
    ///
    /// A producer that never connected is a no-op. The slot refills lazily
    /// on the next `enqueue` or `connect_producer`.
    pub async fn disconnect_producer(&self) -> Result<()> {
        let store = self.producer.lock().await.take();
        if let Some(store) = store {
            store.close().await?;
            info!("producer disconnected");
        }
        Ok(())
    }

    /// The memoized producer store.
    ///
    /// The slot lock is held across open + migrate, so concurrent callers
    /// during the first bootstrap all await the one in-flight creation and
    /// exactly one pool is ever built per connect cycle.
    async fn producer_store(&self) -> Result<Arc<dyn JobStore>> {
        let mut slot = self.producer.lock().await;
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = self.provider.open().await?;
        store.migrate().await?;
        *slot = Some(Arc::clone(&store));
        info!("producer connected");
        Ok(store)
    }

    /// Declare the consumer started and install its handlers.
    pub async fn start_consumer(&self, handlers: HandlerRegistry) -> Result<()> {
        let mut state = self.consumer.lock().await;
        state.started = true;
        state.handlers = Some(Arc::new(handlers));
        self.sync_state(&mut state).await
    }

    /// Declare the consumer stopped. Waits for in-flight jobs to finish.
    pub async fn stop_consumer(&self) -> Result<()> {
        let mut state = self.consumer.lock().await;
        state.started = false;
        self.sync_state(&mut state).await
    }

    /// Keep the consumer started but stop claiming new jobs.
    pub async fn pause_consumer(&self) -> Result<()> {
        let mut state = self.consumer.lock().await;
        state.paused = true;
        self.sync_state(&mut state).await
    }

    /// Undo `pause_consumer`. Does nothing unless currently paused.
    pub async fn resume_consumer(&self) -> Result<()> {
        let mut state = self.consumer.lock().await;
        if !state.paused {
            return Ok(());
        }
        state.paused = false;
        self.sync_state(&mut state).await
    }

    pub async fn is_consumer_paused(&self) -> bool {
        self.consumer.lock().await.paused
    }

    /// Reconcile the materialized runner with the declared intents.
    ///
    /// Runs under the consumer lock: reconciliations are serialized, and
    /// intent changes arriving mid-flight simply queue on the mutex and see
    /// the settled state. Idempotent in both directions.
    async fn sync_state(&self, state: &mut ConsumerState) -> Result<()> {
        if state.should_run() && state.runner.is_none() {
            let handlers = state.handlers.clone().ok_or_else(|| {
                QueueError::Config("consumer started without a handler registry".to_string())
            })?;
            let store = self.provider.open().await?;
            let (stop_handle, stop_token) = stop_channel();
            let worker = WorkerLoop::new(
                Arc::clone(&store),
                handlers,
                Arc::clone(&self.observer),
                Arc::clone(&self.time_provider),
                Arc::clone(&self.retry_policy),
                self.config.poll_interval,
                self.config.concurrency,
            );
            let task = tokio::spawn(async move { worker.run(stop_token).await });
            state.runner = Some(RunnerHandle {
                stop: stop_handle,
                task,
                store,
            });
            info!("consumer runner started");
        } else if !state.should_run() {
            // The handle leaves the state before anything is awaited.
            if let Some(runner) = state.runner.take() {
                runner.stop(&self.observer).await;
                info!("consumer runner stopped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;
    use crate::port::error_observer::mocks::RecordingErrorObserver;
    use crate::port::handler::mocks::{CountingHandler, GatedHandler};
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::store_provider::mocks::CountingStoreProvider;
    use std::time::Duration;

    fn test_config() -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_millis(5),
            ..QueueConfig::default()
        }
    }

    fn queue_with(provider: Arc<CountingStoreProvider>) -> JobQueue {
        JobQueue::new(provider, test_config())
            .with_observer(Arc::new(RecordingErrorObserver::new()))
    }

    async fn wait_for<F: Fn() -> bool>(pred: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !pred() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn concurrent_connects_open_one_pool() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(
            CountingStoreProvider::new(store.clone()).with_open_delay(Duration::from_millis(20)),
        );
        let queue = Arc::new(queue_with(provider.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            tasks.push(tokio::spawn(async move { queue.connect_producer().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(provider.open_calls(), 1);
        assert_eq!(store.migrate_calls(), 1);
    }

    #[tokio::test]
    async fn enqueue_bootstraps_lazily_and_stores_run_at_verbatim() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        let job = queue
            .enqueue("send_email", EnqueueRequest::new(serde_json::json!({"a": 1})).at(123_456))
            .await
            .unwrap();

        assert_eq!(provider.open_calls(), 1);
        assert_eq!(store.migrate_calls(), 1);
        assert_eq!(job.run_at, 123_456);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.max_attempts, queue.config().max_attempts);
        assert_eq!(job.priority, queue.config().priority);

        // Second enqueue reuses the memoized store.
        queue
            .enqueue("send_email", EnqueueRequest::new(serde_json::json!({"a": 2})))
            .await
            .unwrap();
        assert_eq!(provider.open_calls(), 1);
        assert_eq!(store.migrate_calls(), 1);
    }

    #[tokio::test]
    async fn enqueue_defaults_run_at_to_now() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider);

        let before = chrono::Utc::now().timestamp_millis();
        let job = queue
            .enqueue("tick", EnqueueRequest::new(serde_json::json!({})))
            .await
            .unwrap();
        let after = chrono::Utc::now().timestamp_millis();

        assert!(job.run_at >= before && job.run_at <= after);
        assert_eq!(job.created_at, job.run_at);
    }

    #[tokio::test]
    async fn enqueue_failure_propagates_to_the_caller() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider);
        store.set_fail_inserts(true);

        let result = queue
            .enqueue("doomed", EnqueueRequest::new(serde_json::json!({})))
            .await;
        assert!(result.is_err());
        assert_eq!(store.all_jobs().len(), 0);
    }

    #[tokio::test]
    async fn connect_failure_propagates_and_next_attempt_retries() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        provider.set_fail_opens(true);
        assert!(queue.connect_producer().await.is_err());

        provider.set_fail_opens(false);
        queue.connect_producer().await.unwrap();
        assert_eq!(provider.open_calls(), 2);
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_noop() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.disconnect_producer().await.unwrap();
        assert_eq!(provider.open_calls(), 0);
        assert_eq!(store.close_calls(), 0);
    }

    #[tokio::test]
    async fn disconnect_closes_and_reconnect_opens_a_fresh_pool() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.connect_producer().await.unwrap();
        queue.disconnect_producer().await.unwrap();
        assert_eq!(store.close_calls(), 1);

        queue.connect_producer().await.unwrap();
        assert_eq!(provider.open_calls(), 2);
    }

    #[tokio::test]
    async fn repeated_starts_materialize_one_runner() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        assert_eq!(provider.open_calls(), 1);

        queue.stop_consumer().await.unwrap();
        assert_eq!(store.close_calls(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_double_ends_nothing() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.stop_consumer().await.unwrap();
        queue.stop_consumer().await.unwrap();
        assert_eq!(provider.open_calls(), 0);
        assert_eq!(store.close_calls(), 0);
    }

    #[tokio::test]
    async fn pause_tears_down_and_resume_rebuilds() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        assert_eq!(provider.open_calls(), 1);
        assert!(!queue.is_consumer_paused().await);

        queue.pause_consumer().await.unwrap();
        assert!(queue.is_consumer_paused().await);
        // Runner gone, its pool closed: nothing leaked while paused.
        assert_eq!(store.close_calls(), 1);

        queue.resume_consumer().await.unwrap();
        assert!(!queue.is_consumer_paused().await);
        assert_eq!(provider.open_calls(), 2);

        queue.stop_consumer().await.unwrap();
        assert_eq!(store.close_calls(), 2);
    }

    #[tokio::test]
    async fn resume_without_pause_changes_nothing() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        queue.resume_consumer().await.unwrap();
        assert_eq!(provider.open_calls(), 1);
        queue.stop_consumer().await.unwrap();
    }

    #[tokio::test]
    async fn pause_before_start_leaves_consumer_dormant() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.pause_consumer().await.unwrap();
        assert!(queue.is_consumer_paused().await);
        assert_eq!(provider.open_calls(), 0);

        // Starting while paused records the intent but builds nothing.
        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        assert_eq!(provider.open_calls(), 0);

        queue.resume_consumer().await.unwrap();
        assert_eq!(provider.open_calls(), 1);
        queue.stop_consumer().await.unwrap();
    }

    #[tokio::test]
    async fn pause_racing_a_slow_start_settles_without_a_runner() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(
            CountingStoreProvider::new(store.clone()).with_open_delay(Duration::from_millis(30)),
        );
        let queue = Arc::new(queue_with(provider.clone()));

        // Pause lands while the start reconciliation is still opening its
        // pool. Paused wins: whatever was opened must also be closed.
        let starter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.start_consumer(HandlerRegistry::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let pauser = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pause_consumer().await })
        };
        starter.await.unwrap().unwrap();
        pauser.await.unwrap().unwrap();

        assert!(queue.is_consumer_paused().await);
        assert_eq!(provider.open_calls(), store.close_calls());

        // The recorded intents still reconcile later: resume materializes
        // the runner that pause suppressed.
        queue.resume_consumer().await.unwrap();
        assert_eq!(provider.open_calls(), store.close_calls() + 1);
        queue.stop_consumer().await.unwrap();
    }

    #[tokio::test]
    async fn start_stop_start_uses_two_distinct_pools() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider.clone());

        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        queue.stop_consumer().await.unwrap();
        queue.start_consumer(HandlerRegistry::new()).await.unwrap();
        queue.stop_consumer().await.unwrap();

        assert_eq!(provider.open_calls(), 2);
        assert_eq!(store.close_calls(), 2);
    }

    #[tokio::test]
    async fn started_consumer_processes_enqueued_jobs() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider);
        let handler = Arc::new(CountingHandler::new());
        let registry = HandlerRegistry::new().with("greet", handler.clone());

        queue.start_consumer(registry).await.unwrap();
        queue
            .enqueue("greet", EnqueueRequest::new(serde_json::json!({"who": "world"})))
            .await
            .unwrap();

        {
            let handler = handler.clone();
            wait_for(move || handler.call_count() == 1).await;
        }
        queue.stop_consumer().await.unwrap();

        let job = store.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
    }

    #[tokio::test]
    async fn jobs_enqueued_while_paused_run_after_resume() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = queue_with(provider);
        let handler = Arc::new(CountingHandler::new());
        let registry = HandlerRegistry::new().with("later", handler.clone());

        queue.start_consumer(registry).await.unwrap();
        queue.pause_consumer().await.unwrap();

        queue
            .enqueue("later", EnqueueRequest::new(serde_json::json!({})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.call_count(), 0);

        queue.resume_consumer().await.unwrap();
        {
            let handler = handler.clone();
            wait_for(move || handler.call_count() == 1).await;
        }
        queue.stop_consumer().await.unwrap();
    }

    #[tokio::test]
    async fn stop_waits_for_the_job_in_flight() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let queue = Arc::new(queue_with(provider));
        let handler = Arc::new(GatedHandler::new());
        let registry = HandlerRegistry::new().with("slow", handler.clone());

        queue.start_consumer(registry).await.unwrap();
        queue
            .enqueue("slow", EnqueueRequest::new(serde_json::json!({})))
            .await
            .unwrap();
        handler.wait_entered().await;

        let stopper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.stop_consumer().await })
        };
        handler.release();
        stopper.await.unwrap().unwrap();

        let job = store.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
    }

    #[tokio::test]
    async fn loop_store_errors_reach_the_observer_not_the_caller() {
        let store = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(CountingStoreProvider::new(store.clone()));
        let observer = Arc::new(RecordingErrorObserver::new());
        let queue = JobQueue::new(provider, test_config()).with_observer(observer.clone());

        store.set_fail_claims(true);
        queue.start_consumer(HandlerRegistry::new()).await.unwrap();

        {
            let observer = observer.clone();
            wait_for(move || observer.report_count() >= 1).await;
        }
        store.set_fail_claims(false);
        queue.stop_consumer().await.unwrap();

        let (context, error) = &observer.reports()[0];
        assert_eq!(context, "claim due job");
        assert!(error.contains("Connection"));
    }
}
