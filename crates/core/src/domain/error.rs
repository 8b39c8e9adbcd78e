// Domain Error Types

use thiserror::Error;

/// Violations of the job state machine.
#[derive(Error, Debug)]
pub enum DomainError {
    /// The state machine forbids this move (completing a job that was
    /// never claimed, claiming one that is already running).
    #[error("Illegal job transition {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// An update or release targeted an id with no stored row.
    #[error("No job with id {0}")]
    JobNotFound(i64),
}

pub type Result<T> = std::result::Result<T, DomainError>;
