// SQLite Store Provider - pool setup, liveness probe

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;
use workmill_core::error::{QueueError, Result};
use workmill_core::port::{JobStore, JobStoreProvider};
use workmill_core::QueueConfig;

use crate::job_store::SqliteJobStore;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens SQLite-backed job stores.
///
/// Every `open` builds a fresh pool (WAL mode, busy timeout,
/// create-if-missing) and proves it live with one `SELECT 1` round trip
/// before handing the store out. Producer and consumer each get their own
/// pool through their own `open` call.
pub struct SqliteStoreProvider {
    database_url: String,
    schema: String,
    prepared_statements: bool,
    max_connections: u32,
}

impl SqliteStoreProvider {
    pub fn new(database_url: impl Into<String>, config: &QueueConfig) -> Self {
        Self {
            database_url: database_url.into(),
            schema: config.schema.clone(),
            prepared_statements: config.prepared_statements,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    async fn create_pool(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.database_url)
            .map_err(to_connection_error)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(to_connection_error)?;

        Ok(pool)
    }
}

#[async_trait]
impl JobStoreProvider for SqliteStoreProvider {
    async fn open(&self) -> Result<Arc<dyn JobStore>> {
        let pool = self.create_pool().await?;

        // Liveness probe. The pool is handed out only after one successful
        // round trip.
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(to_connection_error)?;

        info!(database_url = %self.database_url, "sqlite pool opened");
        Ok(Arc::new(SqliteJobStore::new(
            pool,
            &self.schema,
            self.prepared_statements,
        )))
    }
}

fn to_connection_error(err: impl std::fmt::Display) -> QueueError {
    QueueError::Connection(err.to_string())
}
