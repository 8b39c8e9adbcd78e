// Workmill Infrastructure - SQLite Adapter
// Implements: JobStore, JobStoreProvider

mod connection;
mod job_store;
mod migration;

pub use connection::SqliteStoreProvider;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;

// sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for QueueError here)
