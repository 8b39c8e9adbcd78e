// Ports (interfaces to the outside world)

pub mod error_observer;
pub mod handler;
pub mod job_store;
pub mod store_provider;
pub mod time_provider;

pub use error_observer::{ErrorObserver, LogErrorObserver};
pub use handler::{HandlerError, HandlerRegistry, JobHandler};
pub use job_store::{JobStore, NewJob};
pub use store_provider::JobStoreProvider;
pub use time_provider::{SystemTimeProvider, TimeProvider};
