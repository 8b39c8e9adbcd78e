// Retry policy

use tracing::{info, warn};

use crate::application::worker::constants::{DEFAULT_RETRY_BASE_DELAY_MS, RETRY_BACKOFF_FACTOR};
use crate::domain::Job;

/// What to do with a job whose handler just failed.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with this run_at (epoch ms).
    Retry { run_at: i64 },
    /// Attempts exhausted; mark failed.
    Failed,
}

/// Exponential backoff over consumed attempts.
///
/// delay = base_delay * backoff_factor ^ (attempts - 1), then a
/// deterministic ±10% spread keyed on the job id.
pub struct RetryPolicy {
    base_delay_ms: i64,
    backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: i64, backoff_factor: f64) -> Self {
        Self {
            base_delay_ms,
            backoff_factor,
        }
    }

    pub fn decide(&self, job: &Job, now_millis: i64) -> RetryDecision {
        if job.attempts_exhausted() {
            warn!(
                job_id = %job.id,
                attempts = %job.attempts,
                max_attempts = %job.max_attempts,
                "attempts exhausted"
            );
            return RetryDecision::Failed;
        }

        let exponent = (job.attempts - 1).max(0);
        let base = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        // Deterministic ±10% spread keyed on the job id.
        let spread = 0.9 + ((job.id.unsigned_abs() % 21) as f64 / 100.0);
        let delay_ms = (base * spread) as i64;

        info!(
            job_id = %job.id,
            attempt = %job.attempts,
            max_attempts = %job.max_attempts,
            delay_ms = %delay_ms,
            "scheduling retry"
        );

        RetryDecision::Retry {
            run_at: now_millis + delay_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY_MS, RETRY_BACKOFF_FACTOR)
    }
}
