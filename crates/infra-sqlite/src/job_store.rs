// SQLite JobStore Implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use workmill_core::domain::{Job, JobId, JobName, JobPayload, JobState};
use workmill_core::error::{QueueError, Result};
use workmill_core::port::{JobStore, NewJob};

// Helper to convert sqlx::Error to QueueError. Connection-class failures
// (including a locked database) map to Connection; the rest are data-class.
fn map_sqlx_error(err: sqlx::Error) -> QueueError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => QueueError::Connection(err.to_string()),
        sqlx::Error::Database(db_err) => {
            // SQLite result codes: 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED.
            match db_err.code().as_deref() {
                Some("5") | Some("6") => QueueError::Connection(format!(
                    "database locked: {}",
                    db_err.message()
                )),
                Some(code) => QueueError::Store(format!(
                    "database error [{}]: {}",
                    code,
                    db_err.message()
                )),
                None => QueueError::Store(format!("database error: {}", db_err.message())),
            }
        }
        _ => QueueError::Store(err.to_string()),
    }
}

// Insert failures carry the enqueue variant so the caller sees "the job was
// not submitted" rather than a generic store error.
fn map_insert_error(err: sqlx::Error) -> QueueError {
    match map_sqlx_error(err) {
        QueueError::Store(msg) => QueueError::Enqueue(msg),
        other => other,
    }
}

/// Namespaced SQL, built once per store.
struct Sql {
    insert: String,
    claim_due: String,
    update: String,
    release: String,
    find_by_id: String,
    count_by_state: String,
}

impl Sql {
    fn new(schema: &str) -> Self {
        let jobs = format!("{}_jobs", schema);
        Self {
            insert: format!(
                "INSERT INTO {jobs} \
                 (name, payload, priority, state, run_at, attempts, max_attempts, created_at) \
                 VALUES (?, ?, ?, ?, ?, 0, ?, ?) \
                 RETURNING *"
            ),
            claim_due: format!(
                "UPDATE {jobs} \
                 SET state = ?, started_at = ?, attempts = attempts + 1 \
                 WHERE id = ( \
                     SELECT id FROM {jobs} \
                     WHERE state = ? AND run_at <= ? \
                     ORDER BY priority ASC, run_at ASC, id ASC \
                     LIMIT 1 \
                 ) \
                 RETURNING *"
            ),
            update: format!(
                "UPDATE {jobs} \
                 SET state = ?, run_at = ?, attempts = ?, started_at = ?, \
                     finished_at = ?, last_error = ? \
                 WHERE id = ?"
            ),
            release: format!(
                "UPDATE {jobs} \
                 SET state = ?, started_at = NULL, attempts = attempts - 1 \
                 WHERE id = ? AND state = ?"
            ),
            find_by_id: format!("SELECT * FROM {jobs} WHERE id = ?"),
            count_by_state: format!("SELECT COUNT(*) FROM {jobs} WHERE state = ?"),
        }
    }
}

/// SQLite-backed job store. One instance per pool, one pool per role.
pub struct SqliteJobStore {
    pool: SqlitePool,
    schema: String,
    persistent: bool,
    sql: Sql,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, schema: &str, prepared_statements: bool) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            persistent: prepared_statements,
            sql: Sql::new(schema),
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn migrate(&self) -> Result<()> {
        crate::migration::run_migrations(&self.pool, &self.schema).await
    }

    async fn insert(&self, new_job: NewJob) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&self.sql.insert)
            .persistent(self.persistent)
            .bind(new_job.name.as_str())
            .bind(new_job.payload.as_value().to_string())
            .bind(new_job.priority)
            .bind(JobState::Queued.to_string())
            .bind(new_job.run_at)
            .bind(new_job.max_attempts)
            .bind(new_job.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)?;

        Ok(row.into_job())
    }

    async fn claim_due(&self, now_millis: i64) -> Result<Option<Job>> {
        // Single UPDATE, so two claimers can never take the same row.
        let row = sqlx::query_as::<_, JobRow>(&self.sql.claim_due)
            .persistent(self.persistent)
            .bind(JobState::Running.to_string())
            .bind(now_millis)
            .bind(JobState::Queued.to_string())
            .bind(now_millis)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_job()))
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(&self.sql.update)
            .persistent(self.persistent)
            .bind(job.state.to_string())
            .bind(job.run_at)
            .bind(job.attempts)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(&job.last_error)
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(workmill_core::domain::DomainError::JobNotFound(job.id).into());
        }
        Ok(())
    }

    async fn release(&self, job_id: JobId) -> Result<()> {
        let result = sqlx::query(&self.sql.release)
            .persistent(self.persistent)
            .bind(JobState::Queued.to_string())
            .bind(job_id)
            .bind(JobState::Running.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(workmill_core::domain::DomainError::JobNotFound(job_id).into());
        }
        Ok(())
    }

    async fn find_by_id(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&self.sql.find_by_id)
            .persistent(self.persistent)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_job()))
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&self.sql.count_by_state)
            .persistent(self.persistent)
            .bind(state.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    name: String,
    payload: String,
    priority: i32,
    state: String,
    run_at: i64,
    attempts: i32,
    max_attempts: i32,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    last_error: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Job {
        let state = match self.state.as_str() {
            "QUEUED" => JobState::Queued,
            "RUNNING" => JobState::Running,
            "DONE" => JobState::Done,
            "FAILED" => JobState::Failed,
            _ => JobState::Failed, // Default fallback
        };

        let payload: serde_json::Value =
            serde_json::from_str(&self.payload).unwrap_or(serde_json::json!({}));

        Job {
            id: self.id,
            name: JobName::new(self.name),
            payload: JobPayload::new(payload),
            priority: self.priority,
            state,
            run_at: self.run_at,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_error: self.last_error,
        }
    }
}
