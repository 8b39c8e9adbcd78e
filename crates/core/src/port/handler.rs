// Job Handler Port

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Job;

/// Error returned by a job handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Executes one kind of job.
///
/// Implementations receive the claimed job and return Ok on success. Any
/// error (or panic, which the loop catches) counts as a failed attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

/// Maps job names to their handlers.
///
/// Built once by the embedding application and handed to the consumer at
/// start. A claimed job whose name has no entry is a configuration error,
/// not a job failure; the loop releases the claim instead of burning an
/// attempt.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Builder form of `register` for inline construction.
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Succeeds every time and remembers what it handled.
    pub struct CountingHandler {
        calls: AtomicUsize,
        seen: Mutex<Vec<Job>>,
    }

    impl CountingHandler {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn seen_jobs(&self) -> Vec<Job> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Default for CountingHandler {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    /// Fails the first `failures` calls, then succeeds.
    pub struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyHandler {
        pub fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        /// A handler that never succeeds.
        pub fn always_failing() -> Self {
            Self::new(usize::MAX)
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HandlerError::failed(format!("induced failure #{}", call + 1)))
            } else {
                Ok(())
            }
        }
    }

    /// Panics on every call. Exercises the loop's panic isolation.
    pub struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }
    }

    /// Blocks until released. Lets tests hold a job in flight.
    ///
    /// Both sides are counting semaphores, so entries and releases are
    /// never lost however the test and the handler interleave.
    pub struct GatedHandler {
        gate: Semaphore,
        entered: Semaphore,
        calls: AtomicUsize,
    }

    impl GatedHandler {
        pub fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                entered: Semaphore::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        /// Resolves once a handler call is in flight. One resolution per call.
        pub async fn wait_entered(&self) {
            self.entered.acquire().await.unwrap().forget();
        }

        /// Lets one in-flight (or future) call finish.
        pub fn release(&self) {
            self.gate.add_permits(1);
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Default for GatedHandler {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl JobHandler for GatedHandler {
        async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.add_permits(1);
            self.gate.acquire().await.unwrap().forget();
            Ok(())
        }
    }
}
