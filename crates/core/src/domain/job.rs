// Job Domain Model

use serde::{Deserialize, Serialize};

/// Job ID, assigned by the durable store on insert.
pub type JobId = i64;

/// Priority (smaller number = claimed first)
pub type Priority = i32;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobState {
    /// Terminal states are never claimed or transitioned again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Done => write!(f, "DONE"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Job name: the key a handler is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobName(String);

impl JobName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job Payload (JSON serializable, opaque to the queue)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Job Entity
///
/// A row in the durable store. The queue never mutates a job after enqueue
/// except through the transitions below, which mirror the store's own state
/// changes (claimed, succeeded, failed, requeued).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: JobName,
    pub payload: JobPayload,
    pub priority: Priority,
    pub state: JobState,

    /// Earliest time the job may be claimed, epoch ms. Stored verbatim from
    /// the caller; the store's clock decides due-ness.
    pub run_at: i64,

    pub attempts: i32,
    pub max_attempts: i32,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    pub last_error: Option<String>,
}

impl Job {
    /// Create a freshly enqueued job.
    ///
    /// `id` comes from the store's insert; `created_at` from the adapter's
    /// time provider, never system time taken here.
    pub fn new(
        id: JobId,
        name: JobName,
        payload: JobPayload,
        run_at: i64,
        priority: Priority,
        max_attempts: i32,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            name,
            payload,
            priority,
            state: JobState::Queued,
            run_at,
            attempts: 0,
            max_attempts,
            created_at,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// Transition to Running when claimed. Claiming consumes an attempt.
    pub fn start(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.state != JobState::Queued {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "RUNNING".to_string(),
            });
        }
        self.state = JobState::Running;
        self.started_at = Some(now_millis);
        self.attempts += 1;
        Ok(())
    }

    /// Transition to Done after the handler succeeded.
    pub fn complete(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.state != JobState::Running {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "DONE".to_string(),
            });
        }
        self.state = JobState::Done;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Mark as Failed with the handler's error. Terminal.
    pub fn fail(&mut self, now_millis: i64, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.finished_at = Some(now_millis);
        self.last_error = Some(error.into());
    }

    /// Put a claimed job back in the queue for another attempt.
    pub fn requeue(&mut self, run_at: i64, error: impl Into<String>) {
        self.state = JobState::Queued;
        self.started_at = None;
        self.run_at = run_at;
        self.last_error = Some(error.into());
    }

    /// True once every allowed attempt has been consumed.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
