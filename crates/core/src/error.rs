// Central Error Type for the Queue

use thiserror::Error;

/// Queue-level error taxonomy.
///
/// Connection-class failures are reported to the registered error observer
/// when they happen inside the polling loop; caller-facing operations
/// (`enqueue`, `connect_producer`) return them synchronously instead.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Pool creation, liveness probe, or store round-trip failures.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema migration failed; the producer is unusable until it succeeds.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The insert itself failed; the job was never durably scheduled.
    #[error("Enqueue error: {0}")]
    Enqueue(String),

    /// Job-specific logic raised; the store's retry policy decides what
    /// happens to the row.
    #[error("Handler error: {0}")]
    Handler(#[from] crate::port::handler::HandlerError),

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store round trip failed for a non-connection reason (bad row,
    /// constraint violation, closed pool race).
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;

// sqlx::Error conversion lives in infra-sqlite, which maps connection-class
// failures to Connection and the rest to per-operation variants.
