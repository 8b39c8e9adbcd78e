// Error Observer Port

use crate::error::QueueError;

/// Sink for errors that surface outside a caller-facing operation.
///
/// The worker loop and the store's connection machinery report here instead
/// of propagating: a dropped connection or a failing poll must never tear
/// down the process that hosts the queue.
pub trait ErrorObserver: Send + Sync {
    fn report(&self, context: &str, error: &QueueError);
}

/// Default observer: structured log lines, nothing else.
pub struct LogErrorObserver;

impl ErrorObserver for LogErrorObserver {
    fn report(&self, context: &str, error: &QueueError) {
        tracing::error!(context = context, error = %error, "queue error observed");
    }
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every reported error for assertions.
    pub struct RecordingErrorObserver {
        reports: Mutex<Vec<(String, String)>>,
    }

    impl RecordingErrorObserver {
        pub fn new() -> Self {
            Self {
                reports: Mutex::new(Vec::new()),
            }
        }

        pub fn reports(&self) -> Vec<(String, String)> {
            self.reports.lock().unwrap().clone()
        }

        pub fn report_count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    impl Default for RecordingErrorObserver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ErrorObserver for RecordingErrorObserver {
        fn report(&self, context: &str, error: &QueueError) {
            self.reports
                .lock()
                .unwrap()
                .push((context.to_string(), error.to_string()));
        }
    }
}
