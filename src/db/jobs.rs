use std::collections::BTreeMap;

use crate::models::{Error, JobRow, JobState, NewJob, StateFilter};
use sqlx::SqlitePool;

pub async fn create(pool: &SqlitePool, job: &NewJob, now: i64) -> Result<JobRow, Error> {
    const SQL: &str = "INSERT INTO jobs
        (id, command, state, attempts, max_retries, created_at, updated_at)
    VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4) RETURNING *";
    sqlx::query_as::<_, JobRow>(SQL)
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.max_retries)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|err| Error::from_insert(err, &job.id))
}

pub async fn get_by_id(pool: &SqlitePool, job_id: &str) -> Result<Option<JobRow>, Error> {
    const SQL: &str = "SELECT * FROM jobs WHERE id = ?1";
    let job = sqlx::query_as::<_, JobRow>(SQL)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

pub async fn list_by_state(pool: &SqlitePool, filter: StateFilter) -> Result<Vec<JobRow>, Error> {
    let jobs = match filter {
        StateFilter::All => {
            const SQL: &str = "SELECT * FROM jobs ORDER BY created_at, rowid";
            sqlx::query_as::<_, JobRow>(SQL).fetch_all(pool).await?
        }
        StateFilter::State(state) => {
            const SQL: &str = "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at, rowid";
            sqlx::query_as::<_, JobRow>(SQL)
                .bind(state)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(jobs)
}

pub async fn counts(pool: &SqlitePool) -> Result<BTreeMap<JobState, i64>, Error> {
    const SQL: &str = "SELECT state, COUNT(*) FROM jobs GROUP BY state";
    let rows = sqlx::query_as::<_, (JobState, i64)>(SQL)
        .fetch_all(pool)
        .await?;
    let mut counts: BTreeMap<JobState, i64> = JobState::ALL.into_iter().map(|s| (s, 0)).collect();
    counts.extend(rows);
    Ok(counts)
}

/// Moves a dead job back to pending with a fresh retry budget.
pub async fn retry_dead(pool: &SqlitePool, job_id: &str, now: i64) -> Result<u64, Error> {
    const SQL: &str = "UPDATE jobs
    SET state = 'pending', attempts = 0, next_run_at = NULL, last_error = NULL,
        locked_by = NULL, locked_at = NULL, updated_at = ?2
    WHERE id = ?1 AND state = 'dead'";
    let res = sqlx::query(SQL)
        .bind(job_id)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
