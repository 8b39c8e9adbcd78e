// Queue Configuration
//
// Every field is a fixed input at construction; nothing here is mutable at
// runtime.

use std::time::Duration;

use crate::application::worker::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_PRIORITY,
    DEFAULT_SCHEMA,
};

/// Configuration for one queue instance (producer and consumer alike).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Namespace prefix for the queue's tables in the backing store.
    pub schema: String,

    /// Whether the store adapter may cache prepared statements.
    pub prepared_statements: bool,

    /// How long the runner sleeps between empty polls.
    pub poll_interval: Duration,

    /// Ceiling on jobs executing concurrently within one runner. The
    /// default of 1 means strictly serial execution and should be kept
    /// unless handlers are known to tolerate parallelism.
    pub concurrency: usize,

    /// Attempts a job gets before it is marked failed. The default of 1
    /// means a handler failure is terminal for that job instance.
    pub max_attempts: i32,

    /// Priority stamped on every enqueued job.
    pub priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            prepared_statements: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority: DEFAULT_PRIORITY,
        }
    }
}
