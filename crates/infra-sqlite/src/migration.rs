// Migration Runner

use sqlx::SqlitePool;
use tracing::info;
use workmill_core::error::{QueueError, Result};

// Versioned migrations, applied in order. Each file may use the {schema}
// placeholder for the configured table namespace.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "initial schema",
    include_str!("../migrations/001_initial_schema.sql"),
)];

/// Apply pending migrations for the given namespace. Idempotent.
pub async fn run_migrations(pool: &SqlitePool, schema: &str) -> Result<()> {
    let version_table = format!("{}_schema_version", schema);

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
        version_table
    ))
    .execute(pool)
    .await
    .map_err(to_migration_error)?;

    let current_version: i64 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(MAX(version), 0) FROM {}",
        version_table
    ))
    .fetch_one(pool)
    .await
    .map_err(to_migration_error)?;

    for (version, label, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }
        info!(version = %version, label = %label, "applying migration");
        let sql = sql.replace("{schema}", schema);
        apply_migration(pool, &version_table, *version, &sql).await?;
    }

    Ok(())
}

/// Apply one migration file and record its version, in one transaction.
async fn apply_migration(
    pool: &SqlitePool,
    version_table: &str,
    version: i64,
    sql: &str,
) -> Result<()> {
    let mut tx = pool.begin().await.map_err(to_migration_error)?;

    // Split by semicolon and execute each statement, comments stripped.
    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(to_migration_error)?;
        }
    }

    sqlx::query(&format!(
        "INSERT INTO {} (version, applied_at) VALUES (?, ?)",
        version_table
    ))
    .bind(version)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(&mut *tx)
    .await
    .map_err(to_migration_error)?;

    tx.commit().await.map_err(to_migration_error)?;
    Ok(())
}

fn to_migration_error(err: sqlx::Error) -> QueueError {
    QueueError::Migration(err.to_string())
}
