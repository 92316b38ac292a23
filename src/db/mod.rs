use crate::models::Error;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::{str::FromStr, time::Duration};
#[allow(unused_imports)]
use tracing::{debug, info};

pub mod jobqueue;
pub mod jobs;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    next_run_at INTEGER,
    last_error TEXT,
    locked_by TEXT,
    locked_at INTEGER
)";

const INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_state_next_run ON jobs(state, next_run_at)",
    "CREATE INDEX IF NOT EXISTS idx_locked_by ON jobs(locked_by)",
];

/// Columns added after the first schema version.
const LOCK_COLUMNS: [(&str, &str); 2] = [
    ("locked_by", "ALTER TABLE jobs ADD COLUMN locked_by TEXT"),
    ("locked_at", "ALTER TABLE jobs ADD COLUMN locked_at INTEGER"),
];

pub async fn connect(db_url: &str) -> Result<SqlitePool, Error> {
    let conn = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(conn)
        .await?;
    debug!({ db_url }, "connected");
    Ok(pool)
}

/// Creates the jobs table and indexes, upgrading older tables in place.
pub async fn migrate(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::query(SCHEMA).execute(pool).await?;

    let columns = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info('jobs')")
        .fetch_all(pool)
        .await?;
    for (column, sql) in LOCK_COLUMNS {
        if !columns.iter().any(|c| c == column) {
            sqlx::query(sql).execute(pool).await?;
            info!({ column }, "added column");
        }
    }

    for sql in INDEXES {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

pub async fn select_one(pool: &SqlitePool) -> Result<(), Error> {
    _ = sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> anyhow::Result<(tempfile::TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let db_url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let pool = connect(&db_url).await?;
    migrate(&pool).await?;
    Ok((dir, pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool().await?;

        // act
        migrate(&pool).await?;

        // assert
        select_one(&pool).await?;
        let indexes = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'jobs' ORDER BY name",
        )
        .fetch_all(&pool)
        .await?;
        assert!(indexes.contains(&"idx_locked_by".to_owned()));
        assert!(indexes.contains(&"idx_state_next_run".to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn migrate_adds_lock_columns_to_old_table() -> anyhow::Result<()> {
        // arrange
        let dir = tempfile::tempdir()?;
        let db_url = format!("sqlite://{}", dir.path().join("old.db").display());
        let pool = connect(&db_url).await?;
        sqlx::query(
            "CREATE TABLE jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                next_run_at INTEGER,
                last_error TEXT
            )",
        )
        .execute(&pool)
        .await?;

        // act
        migrate(&pool).await?;

        // assert
        let columns = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info('jobs')")
            .fetch_all(&pool)
            .await?;
        assert!(columns.contains(&"locked_by".to_owned()));
        assert!(columns.contains(&"locked_at".to_owned()));
        Ok(())
    }
}
