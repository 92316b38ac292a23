use std::{collections::BTreeMap, time::Duration};

use sqlx::SqlitePool;
#[allow(unused_imports)]
use tracing::{debug, info, warn};

use crate::{
    db,
    models::{now_millis, AppState, Error, JobCreate, JobRow, JobState, QueueOptions, StateFilter},
};

/// Queue operations over an explicit store handle.
#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    options: QueueOptions,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, options: QueueOptions) -> Self {
        Self { pool, options }
    }

    pub fn from_state(app_state: &AppState) -> Self {
        Self::new(app_state.pool.clone(), app_state.queue_options.clone())
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub async fn enqueue(&self, job: JobCreate) -> Result<JobRow, Error> {
        let job = job.validate(self.options.default_max_retries)?;
        let row = db::jobs::create(&self.pool, &job, now_millis()).await?;
        info!({ job_id = row.id.as_str(), max_retries = row.max_retries }, "enqueued");
        Ok(row)
    }

    pub async fn list_by_state(&self, filter: StateFilter) -> Result<Vec<JobRow>, Error> {
        db::jobs::list_by_state(&self.pool, filter).await
    }

    pub async fn counts(&self) -> Result<BTreeMap<JobState, i64>, Error> {
        db::jobs::counts(&self.pool).await
    }

    pub async fn get_by_id(&self, job_id: &str) -> Result<Option<JobRow>, Error> {
        db::jobs::get_by_id(&self.pool, job_id).await
    }

    /// Returns `false` without touching the record unless the job is dead.
    pub async fn retry_dead(&self, job_id: &str) -> Result<bool, Error> {
        let now = now_millis();
        let updated = db::jobs::retry_dead(&self.pool, job_id, now).await? > 0;
        match updated {
            true => info!({ job_id }, "requeued from dead letter"),
            false => debug!({ job_id }, "not dead, requeue skipped"),
        }
        Ok(updated)
    }

    pub async fn claim(&self, worker_id: &str) -> Result<Option<JobRow>, Error> {
        self.claim_at(worker_id, now_millis()).await
    }

    pub(crate) async fn claim_at(
        &self,
        worker_id: &str,
        now: i64,
    ) -> Result<Option<JobRow>, Error> {
        let stale_before = now.saturating_sub(millis(self.options.lease_timeout));
        db::jobqueue::claim(&self.pool, worker_id, now, stale_before).await
    }

    pub async fn complete(
        &self,
        job: &JobRow,
        worker_id: &str,
        output: &str,
    ) -> Result<bool, Error> {
        let now = now_millis();
        let res = db::jobqueue::complete(&self.pool, &job.id, worker_id, output, now).await?;
        Ok(res > 0)
    }

    pub async fn reschedule(
        &self,
        job: &JobRow,
        worker_id: &str,
        attempts: i32,
        delay: Duration,
        error: &str,
    ) -> Result<bool, Error> {
        let now = now_millis();
        let next_run_at = now.saturating_add(millis(delay));
        let res = db::jobqueue::reschedule(
            &self.pool,
            &job.id,
            worker_id,
            attempts,
            next_run_at,
            error,
            now,
        )
        .await?;
        Ok(res > 0)
    }

    pub async fn bury(
        &self,
        job: &JobRow,
        worker_id: &str,
        attempts: i32,
        error: &str,
    ) -> Result<bool, Error> {
        let now = now_millis();
        let res = db::jobqueue::bury(&self.pool, &job.id, worker_id, attempts, error, now).await?;
        Ok(res > 0)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
