// Job Store Port

use async_trait::async_trait;

use crate::domain::{Job, JobId, JobName, JobPayload, JobState, Priority};
use crate::error::Result;

/// Fields for a job about to be persisted. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: JobName,
    pub payload: JobPayload,
    pub run_at: i64,
    pub priority: Priority,
    pub max_attempts: i32,
    pub created_at: i64,
}

/// Durable storage for jobs.
///
/// `claim_due` must be atomic: two concurrent callers never receive the
/// same job. Everything else is plain row access.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Apply pending schema migrations. Idempotent.
    async fn migrate(&self) -> Result<()>;

    /// Persist a new queued job and return it with its assigned id.
    async fn insert(&self, new_job: NewJob) -> Result<Job>;

    /// Claim the next due queued job, if any.
    ///
    /// Due means `run_at <= now_millis`. Selection order is priority, then
    /// run_at, then id, all ascending. The claim itself marks the job
    /// Running and consumes an attempt in the same atomic step.
    async fn claim_due(&self, now_millis: i64) -> Result<Option<Job>>;

    /// Persist the given job's current state over the stored row.
    async fn update(&self, job: &Job) -> Result<()>;

    /// Undo a claim: back to Queued with the consumed attempt restored.
    ///
    /// Used when the claimed job cannot even be dispatched (no handler
    /// registered for its name), which must not count against the job.
    async fn release(&self, job_id: JobId) -> Result<()>;

    async fn find_by_id(&self, job_id: JobId) -> Result<Option<Job>>;

    async fn count_by_state(&self, state: JobState) -> Result<i64>;

    /// Close the underlying pool. The store must not be used afterwards.
    async fn close(&self) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::QueueError;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store for unit tests. Mirrors the SQL adapter's claim
    /// semantics, including ordering and attempt accounting.
    pub struct InMemoryJobStore {
        jobs: Mutex<Vec<Job>>,
        next_id: AtomicI64,
        migrate_calls: AtomicUsize,
        close_calls: AtomicUsize,
        fail_inserts: AtomicBool,
        fail_claims: AtomicBool,
        fail_updates: AtomicBool,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1),
                migrate_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                fail_inserts: AtomicBool::new(false),
                fail_claims: AtomicBool::new(false),
                fail_updates: AtomicBool::new(false),
            }
        }

        pub fn migrate_calls(&self) -> usize {
            self.migrate_calls.load(Ordering::SeqCst)
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }

        pub fn set_fail_inserts(&self, fail: bool) {
            self.fail_inserts.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_claims(&self, fail: bool) {
            self.fail_claims.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_updates(&self, fail: bool) {
            self.fail_updates.store(fail, Ordering::SeqCst);
        }

        pub fn all_jobs(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }
    }

    impl Default for InMemoryJobStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn migrate(&self) -> Result<()> {
            self.migrate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn insert(&self, new_job: NewJob) -> Result<Job> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(QueueError::Connection("injected insert failure".into()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let job = Job::new(
                id,
                new_job.name,
                new_job.payload,
                new_job.run_at,
                new_job.priority,
                new_job.max_attempts,
                new_job.created_at,
            );
            self.jobs.lock().unwrap().push(job.clone());
            Ok(job)
        }

        async fn claim_due(&self, now_millis: i64) -> Result<Option<Job>> {
            if self.fail_claims.load(Ordering::SeqCst) {
                return Err(QueueError::Connection("injected claim failure".into()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            let mut best: Option<usize> = None;
            for (idx, job) in jobs.iter().enumerate() {
                if job.state != JobState::Queued || job.run_at > now_millis {
                    continue;
                }
                best = match best {
                    None => Some(idx),
                    Some(cur) => {
                        let c = &jobs[cur];
                        let key = (job.priority, job.run_at, job.id);
                        let cur_key = (c.priority, c.run_at, c.id);
                        if key < cur_key {
                            Some(idx)
                        } else {
                            Some(cur)
                        }
                    }
                };
            }
            match best {
                None => Ok(None),
                Some(idx) => {
                    let job = &mut jobs[idx];
                    job.start(now_millis)?;
                    Ok(Some(job.clone()))
                }
            }
        }

        async fn update(&self, updated: &Job) -> Result<()> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(QueueError::Connection("injected update failure".into()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == updated.id) {
                Some(slot) => {
                    *slot = updated.clone();
                    Ok(())
                }
                None => Err(crate::domain::DomainError::JobNotFound(updated.id).into()),
            }
        }

        async fn release(&self, job_id: JobId) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == job_id) {
                Some(job) => {
                    job.state = JobState::Queued;
                    job.started_at = None;
                    job.attempts -= 1;
                    Ok(())
                }
                None => Err(crate::domain::DomainError::JobNotFound(job_id).into()),
            }
        }

        async fn find_by_id(&self, job_id: JobId) -> Result<Option<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.iter().find(|j| j.id == job_id).cloned())
        }

        async fn count_by_state(&self, state: JobState) -> Result<i64> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.iter().filter(|j| j.state == state).count() as i64)
        }

        async fn close(&self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn sample_new_job(name: &str, run_at: i64, priority: Priority) -> NewJob {
            NewJob {
                name: JobName::new(name),
                payload: JobPayload::new(serde_json::json!({})),
                run_at,
                priority,
                max_attempts: 1,
                created_at: 0,
            }
        }

        #[tokio::test]
        async fn claim_respects_run_at() {
            let store = InMemoryJobStore::new();
            store.insert(sample_new_job("later", 5_000, 1)).await.unwrap();
            assert!(store.claim_due(4_999).await.unwrap().is_none());
            let claimed = store.claim_due(5_000).await.unwrap().unwrap();
            assert_eq!(claimed.state, JobState::Running);
            assert_eq!(claimed.attempts, 1);
        }

        #[tokio::test]
        async fn claim_orders_by_priority_then_run_at_then_id() {
            let store = InMemoryJobStore::new();
            let low = store.insert(sample_new_job("low", 100, 5)).await.unwrap();
            let high_late = store.insert(sample_new_job("high_late", 200, 1)).await.unwrap();
            let high_early = store.insert(sample_new_job("high_early", 100, 1)).await.unwrap();

            let first = store.claim_due(1_000).await.unwrap().unwrap();
            let second = store.claim_due(1_000).await.unwrap().unwrap();
            let third = store.claim_due(1_000).await.unwrap().unwrap();

            assert_eq!(first.id, high_early.id);
            assert_eq!(second.id, high_late.id);
            assert_eq!(third.id, low.id);
        }

        #[tokio::test]
        async fn release_restores_the_attempt() {
            let store = InMemoryJobStore::new();
            let job = store.insert(sample_new_job("job", 0, 1)).await.unwrap();
            let claimed = store.claim_due(10).await.unwrap().unwrap();
            assert_eq!(claimed.attempts, 1);

            store.release(job.id).await.unwrap();
            let restored = store.find_by_id(job.id).await.unwrap().unwrap();
            assert_eq!(restored.state, JobState::Queued);
            assert_eq!(restored.attempts, 0);
            assert_eq!(restored.started_at, None);
        }
    }
}
