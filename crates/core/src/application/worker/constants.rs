// Worker constants (no magic values in the loop body)
use std::time::Duration;

/// Table-name prefix used when the caller does not configure one
pub const DEFAULT_SCHEMA: &str = "workmill";

/// Sleep between polls when no job is due (2s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Handler slots per runner (1 = strictly serial)
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Attempts a job gets unless overridden at enqueue (1 = no retry)
pub const DEFAULT_MAX_ATTEMPTS: i32 = 1;

/// Priority stamped on every enqueued job
pub const DEFAULT_PRIORITY: i32 = 1;

/// Sleep after an infrastructure error before the loop polls again (1s)
pub const ERROR_RECOVERY_SLEEP: Duration = Duration::from_secs(1);

/// Base delay for retry backoff (1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Exponential backoff multiplier per consumed attempt
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;
