// Job Store Provider Port

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::port::job_store::JobStore;

/// Opens a ready-to-use job store.
///
/// `open` owns the expensive part: building the connection pool, probing
/// liveness, wiring the error observer. Callers memoize the returned store;
/// the provider is only asked again after a disconnect.
#[async_trait]
pub trait JobStoreProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn JobStore>>;
}

pub mod mocks {
    use super::*;
    use crate::error::QueueError;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands out a shared in-memory store and counts how often it is asked.
    pub struct CountingStoreProvider {
        store: Arc<InMemoryJobStore>,
        open_calls: AtomicUsize,
        fail_opens: AtomicBool,
        open_delay: Option<Duration>,
    }

    impl CountingStoreProvider {
        pub fn new(store: Arc<InMemoryJobStore>) -> Self {
            Self {
                store,
                open_calls: AtomicUsize::new(0),
                fail_opens: AtomicBool::new(false),
                open_delay: None,
            }
        }

        /// Make `open` yield for a while, widening race windows in tests.
        pub fn with_open_delay(mut self, delay: Duration) -> Self {
            self.open_delay = Some(delay);
            self
        }

        pub fn open_calls(&self) -> usize {
            self.open_calls.load(Ordering::SeqCst)
        }

        pub fn set_fail_opens(&self, fail: bool) {
            self.fail_opens.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl JobStoreProvider for CountingStoreProvider {
        async fn open(&self) -> Result<Arc<dyn JobStore>> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_opens.load(Ordering::SeqCst) {
                return Err(QueueError::Connection("injected open failure".into()));
            }
            Ok(self.store.clone())
        }
    }
}
