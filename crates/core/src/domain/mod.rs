// Domain Layer - Pure entities and state transitions

pub mod error;
pub mod job;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobName, JobPayload, JobState, Priority};
