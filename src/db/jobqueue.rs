use crate::models::{Error, JobRow};
use sqlx::SqlitePool;

/// Leases the oldest eligible job to `worker_id`.
///
/// A job is eligible when it is pending, due, and not held by a live lease,
/// or when it is running under a lease older than `stale_before` (the worker
/// holding it is presumed dead). Selection and lock happen in one statement
/// inside one transaction, so concurrent callers never see the same row.
pub async fn claim(
    pool: &SqlitePool,
    worker_id: &str,
    now: i64,
    stale_before: i64,
) -> Result<Option<JobRow>, Error> {
    const SQL: &str = "UPDATE jobs
    SET state = 'running', locked_by = ?1, locked_at = ?2, updated_at = ?2
    WHERE id = (
        SELECT id FROM jobs
        WHERE (state = 'pending'
                AND (next_run_at IS NULL OR next_run_at <= ?2)
                AND (locked_by IS NULL OR locked_at < ?3))
            OR (state = 'running' AND (locked_at IS NULL OR locked_at < ?3))
        ORDER BY created_at, rowid
        LIMIT 1
    )
    RETURNING *";

    let mut tx = pool.begin().await?;
    let job = sqlx::query_as::<_, JobRow>(SQL)
        .bind(worker_id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(job)
}

// Outcome writes only land while `worker_id` still holds the lease.

pub async fn complete(
    pool: &SqlitePool,
    job_id: &str,
    worker_id: &str,
    output: &str,
    now: i64,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE jobs
    SET state = 'completed', locked_by = NULL, locked_at = NULL, last_error = ?3, updated_at = ?4
    WHERE id = ?1 AND locked_by = ?2 AND state = 'running'";
    let res = sqlx::query(SQL)
        .bind(job_id)
        .bind(worker_id)
        .bind(output)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn reschedule(
    pool: &SqlitePool,
    job_id: &str,
    worker_id: &str,
    attempts: i32,
    next_run_at: i64,
    error: &str,
    now: i64,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE jobs
    SET state = 'pending', attempts = ?3, next_run_at = ?4, last_error = ?5,
        locked_by = NULL, locked_at = NULL, updated_at = ?6
    WHERE id = ?1 AND locked_by = ?2 AND state = 'running'";
    let res = sqlx::query(SQL)
        .bind(job_id)
        .bind(worker_id)
        .bind(attempts)
        .bind(next_run_at)
        .bind(error)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn bury(
    pool: &SqlitePool,
    job_id: &str,
    worker_id: &str,
    attempts: i32,
    error: &str,
    now: i64,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE jobs
    SET state = 'dead', attempts = ?3, last_error = ?4, next_run_at = NULL,
        locked_by = NULL, locked_at = NULL, updated_at = ?5
    WHERE id = ?1 AND locked_by = ?2 AND state = 'running'";
    let res = sqlx::query(SQL)
        .bind(job_id)
        .bind(worker_id)
        .bind(attempts)
        .bind(error)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
