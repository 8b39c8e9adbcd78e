// Application layer - queue operations and the worker loop

pub mod queue;
pub mod retry;
pub mod worker;

pub use queue::{EnqueueRequest, JobQueue};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::WorkerLoop;
