use futures::{future::join_all, FutureExt};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{select, sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::{
    models::{AppState, Error, WorkerOptions},
    services::{jobqueue::JobQueue, jobrunner},
};

#[derive(Debug)]
pub struct WorkerPool {
    app_state: Arc<AppState>,
    queue: JobQueue,
    shutdown_token: CancellationToken,
    running_workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(app_state: Arc<AppState>) -> Self {
        let queue = JobQueue::from_state(&app_state);
        let shutdown_token = app_state.shutdown_token.child_token();
        Self {
            app_state,
            queue,
            shutdown_token,
            running_workers: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Spawns `count` worker loops.
    pub async fn start(&self, count: usize) -> Result<(), Error> {
        let instance_id = self.app_state.instance_id.as_str();
        if count == 0 {
            debug!({ instance_id, count }, "workers count equals to 0");
            return Ok(());
        }
        if self.shutdown_token.is_cancelled() {
            return Err(Error::InvalidParams("pool already stopped"));
        }
        info!({ instance_id, count }, "start");
        let mut running_workers = self.running_workers.lock().await;
        for _ in 0..count {
            let worker_id = self.app_state.next_worker_id();
            let join_handle = tokio::spawn(run_worker(
                self.queue.clone(),
                worker_id,
                self.app_state.worker_options.clone(),
                self.shutdown_token.clone(),
            ));
            running_workers.push(join_handle);
        }
        Ok(())
    }

    /// Stops claiming and waits for in-flight jobs to finish.
    pub async fn stop(&self) {
        let instance_id = self.app_state.instance_id.as_str();
        self.shutdown_token.cancel();
        let running_workers: Vec<_> = self.running_workers.lock().await.drain(..).collect();
        for res in join_all(running_workers).await {
            if let Err(err) = res {
                error!({ instance_id }, "worker join error {:?}", err);
            }
        }
        info!({ instance_id }, "stop");
    }

    /// Runs the configured number of workers until the shutdown token fires.
    pub async fn run(&self) -> Result<(), Error> {
        let workers_count = self.app_state.worker_options.workers_count;
        self.start(workers_count).await?;
        self.shutdown_token.cancelled().await;
        self.stop().await;
        Ok(())
    }
}

pub async fn run_worker(
    queue: JobQueue,
    worker_id: String,
    options: WorkerOptions,
    shutdown_token: CancellationToken,
) {
    let worker_id = worker_id.as_str();
    info!({ worker_id }, "run_worker");
    while !shutdown_token.is_cancelled() {
        let res = AssertUnwindSafe(run_job(&queue, worker_id))
            .catch_unwind()
            .await;
        match res {
            Ok(Ok(true)) => (),
            Ok(Ok(false)) => wait_or_shutdown(options.poll_interval, &shutdown_token).await,
            Ok(Err(err)) => {
                error!({ worker_id }, "error {}", err);
                wait_or_shutdown(options.error_backoff, &shutdown_token).await;
            }
            Err(_) => {
                error!({ worker_id }, "panicked while running job");
                wait_or_shutdown(options.error_backoff, &shutdown_token).await;
            }
        }
    }
    info!({ worker_id }, "stop_worker");
}

async fn run_job(queue: &JobQueue, worker_id: &str) -> Result<bool, Error> {
    let row = queue.claim(worker_id).await?;
    if let Some(job) = row {
        jobrunner::job_run(queue, worker_id, &job).await?;
        return Ok(true);
    }
    Ok(false)
}

async fn wait_or_shutdown(period: Duration, shutdown_token: &CancellationToken) {
    select!(
        biased;
        _ = shutdown_token.cancelled() => {},
        _ = time::sleep(period) => {},
    );
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        db,
        models::{JobCreate, JobRetry, JobRow, JobState, QueueOptions},
    };

    async fn test_state(backoff_base: u32) -> anyhow::Result<(tempfile::TempDir, AppState)> {
        let (dir, pool) = db::test_pool().await?;
        let queue_options = QueueOptions {
            retry: JobRetry::new(backoff_base),
            ..Default::default()
        };
        let worker_options = WorkerOptions {
            workers_count: 2,
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        };
        Ok((dir, AppState::with_pool(pool, queue_options, worker_options)))
    }

    async fn test_pool(backoff_base: u32) -> anyhow::Result<(tempfile::TempDir, WorkerPool)> {
        let (dir, state) = test_state(backoff_base).await?;
        Ok((dir, WorkerPool::new(Arc::new(state))))
    }

    async fn wait_for_state(
        queue: &JobQueue,
        job_id: &str,
        state: JobState,
    ) -> anyhow::Result<JobRow> {
        let wait = async {
            loop {
                if let Some(job) = queue.get_by_id(job_id).await? {
                    if job.state == state {
                        return Ok::<_, Error>(job);
                    }
                }
                time::sleep(Duration::from_millis(20)).await;
            }
        };
        Ok(time::timeout(Duration::from_secs(15), wait).await??)
    }

    #[tokio::test]
    async fn successful_job_completes() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(2).await?;
        let job = pool.queue().enqueue(JobCreate::new("exit 0")).await?;

        // act
        pool.start(2).await?;
        let done = wait_for_state(pool.queue(), &job.id, JobState::Completed).await;
        pool.stop().await;

        // assert
        let done = done?;
        assert_eq!(0, done.attempts);
        assert!(!done.is_locked());
        Ok(())
    }

    #[tokio::test]
    async fn failing_job_with_single_retry_goes_dead() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(2).await?;
        let job = pool
            .queue()
            .enqueue(JobCreate::new("exit 1").with_max_retries(1))
            .await?;

        // act
        pool.start(1).await?;
        let dead = wait_for_state(pool.queue(), &job.id, JobState::Dead).await;
        pool.stop().await;

        // assert
        let dead = dead?;
        assert_eq!(1, dead.attempts);
        assert_eq!(None, dead.next_run_at);
        assert!(dead.last_error.unwrap_or_default().contains("stderr:"));
        Ok(())
    }

    #[tokio::test]
    async fn failing_job_retries_until_dead() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(0).await?;
        let job = pool
            .queue()
            .enqueue(JobCreate::new("echo attempt; exit 2").with_max_retries(3))
            .await?;

        // act
        pool.start(2).await?;
        let dead = wait_for_state(pool.queue(), &job.id, JobState::Dead).await;
        pool.stop().await;

        // assert
        let dead = dead?;
        assert_eq!(3, dead.attempts);
        assert!(dead.last_error.unwrap_or_default().contains("attempt"));
        Ok(())
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_job() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(2).await?;
        let job = pool
            .queue()
            .enqueue(JobCreate::new("sleep 1; echo slow"))
            .await?;
        pool.start(1).await?;
        wait_for_state(pool.queue(), &job.id, JobState::Running).await?;

        // act
        pool.stop().await;

        // assert
        let job = pool.queue().get_by_id(&job.id).await?.expect("exists");
        assert_eq!(JobState::Completed, job.state);
        Ok(())
    }

    #[tokio::test]
    async fn stopped_pool_leaves_new_jobs_pending() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(2).await?;
        pool.start(2).await?;
        pool.stop().await;

        // act
        let job = pool.queue().enqueue(JobCreate::new("exit 0")).await?;
        time::sleep(Duration::from_millis(100)).await;

        // assert
        let job = pool.queue().get_by_id(&job.id).await?.expect("exists");
        assert_eq!(JobState::Pending, job.state);
        assert!(pool.start(1).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn workers_survive_store_errors() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(2).await?;
        pool.start(2).await?;

        // act
        pool.app_state.pool.close().await;
        time::sleep(Duration::from_millis(100)).await;
        let finished = pool
            .running_workers
            .lock()
            .await
            .iter()
            .any(|handle| handle.is_finished());

        // assert
        assert!(!finished);
        time::timeout(Duration::from_secs(5), pool.stop()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn app_shutdown_stops_pool_run() -> anyhow::Result<()> {
        // arrange
        let (_dir, pool) = test_pool(2).await?;
        let token = pool.app_state.shutdown_token.clone();

        // act
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let res = time::timeout(Duration::from_secs(5), pool.run()).await?;

        // assert
        res?;
        Ok(())
    }

    #[tokio::test]
    async fn pools_sharing_state_use_distinct_worker_ids() -> anyhow::Result<()> {
        // arrange
        let (_dir, state) = test_state(2).await?;
        let state = Arc::new(state);
        let first = WorkerPool::new(Arc::clone(&state));
        let second = WorkerPool::new(Arc::clone(&state));
        let x = first.queue().enqueue(JobCreate::new("sleep 1")).await?;
        let y = first.queue().enqueue(JobCreate::new("sleep 1")).await?;

        // act
        first.start(1).await?;
        second.start(1).await?;
        let x = wait_for_state(first.queue(), &x.id, JobState::Running).await;
        let y = wait_for_state(first.queue(), &y.id, JobState::Running).await;
        first.stop().await;
        second.stop().await;

        // assert
        let (x, y) = (x?, y?);
        assert!(x.locked_by.is_some());
        assert!(y.locked_by.is_some());
        assert_ne!(x.locked_by, y.locked_by);
        Ok(())
    }
}
