use dotenv::dotenv;
use sqlx::SqlitePool;
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use super::{Error, JobRetry};
use crate::db;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://queue.db";

#[derive(Debug)]
pub struct AppState {
    pub instance_id: String,
    pub pool: SqlitePool,
    pub queue_options: QueueOptions,
    pub worker_options: WorkerOptions,
    pub shutdown_token: CancellationToken,
    worker_seq: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub default_max_retries: i32,
    pub lease_timeout: Duration,
    pub retry: JobRetry,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub workers_count: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            default_max_retries: 3,
            lease_timeout: Duration::from_secs(5 * 60),
            retry: JobRetry::default(),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            workers_count: 1,
            poll_interval: Duration::from_millis(500),
            error_backoff: Duration::from_millis(1000),
        }
    }
}

impl QueueOptions {
    pub fn from_env() -> Result<Self, Error> {
        let defaults = QueueOptions::default();
        Ok(QueueOptions {
            default_max_retries: env_or("QUEUE_DEFAULT_MAX_RETRIES", defaults.default_max_retries)?,
            lease_timeout: Duration::from_secs(env_or(
                "QUEUE_LEASE_TIMEOUT_SECS",
                defaults.lease_timeout.as_secs(),
            )?),
            retry: JobRetry::new(env_or("QUEUE_BACKOFF_BASE", defaults.retry.backoff_base)?),
        })
    }
}

impl WorkerOptions {
    pub fn from_env() -> Result<Self, Error> {
        let defaults = WorkerOptions::default();
        Ok(WorkerOptions {
            workers_count: env_or("QUEUE_WORKERS_COUNT", defaults.workers_count)?,
            poll_interval: Duration::from_millis(env_or(
                "QUEUE_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            error_backoff: Duration::from_millis(env_or(
                "QUEUE_ERROR_BACKOFF_MS",
                defaults.error_backoff.as_millis() as u64,
            )?),
        })
    }
}

impl AppState {
    /// Builds the state from the environment, opening and migrating the store.
    pub async fn new() -> Result<Arc<AppState>, Error> {
        dotenv().ok();
        let db_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned());
        let pool = db::connect(&db_url).await?;
        db::migrate(&pool).await?;
        let state =
            AppState::with_pool(pool, QueueOptions::from_env()?, WorkerOptions::from_env()?);
        Ok(Arc::new(state))
    }

    pub fn with_pool(
        pool: SqlitePool,
        queue_options: QueueOptions,
        worker_options: WorkerOptions,
    ) -> AppState {
        let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_owned());
        let instance_id = format!("{}:{}", hostname, std::process::id());
        AppState {
            instance_id,
            pool,
            queue_options,
            worker_options,
            shutdown_token: CancellationToken::new(),
            worker_seq: AtomicUsize::new(0),
        }
    }

    /// Hands out a worker id that no other worker of this instance shares.
    pub fn next_worker_id(&self) -> String {
        let idx = self.worker_seq.fetch_add(1, Ordering::SeqCst);
        format!("{}:{}", self.instance_id, idx)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, Error> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{key}={val}"))),
        Err(_) => Ok(default),
    }
}

#[tokio::test]
async fn env_or_uses_default_when_unset() -> anyhow::Result<()> {
    // act
    let val: u32 = env_or("QUEUECTL_TEST_UNSET_VARIABLE", 7)?;

    // assert
    assert_eq!(7, val);
    Ok(())
}

#[tokio::test]
async fn env_or_rejects_garbage() -> anyhow::Result<()> {
    // arrange
    std::env::set_var("QUEUECTL_TEST_GARBAGE_VARIABLE", "many");

    // act
    let res: Result<u32, _> = env_or("QUEUECTL_TEST_GARBAGE_VARIABLE", 7);

    // assert
    assert!(matches!(res, Err(Error::InvalidConfig(_))));
    Ok(())
}

#[tokio::test]
async fn next_worker_id_is_unique_per_state() -> anyhow::Result<()> {
    // arrange
    let pool = SqlitePool::connect_lazy("sqlite::memory:")?;
    let state = AppState::with_pool(pool, QueueOptions::default(), WorkerOptions::default());

    // act
    let first = state.next_worker_id();
    let second = state.next_worker_id();

    // assert
    assert_eq!(format!("{}:0", state.instance_id), first);
    assert_eq!(format!("{}:1", state.instance_id), second);
    Ok(())
}

#[tokio::test]
async fn options_defaults() -> anyhow::Result<()> {
    // act
    let queue = QueueOptions::default();
    let worker = WorkerOptions::default();

    // assert
    assert_eq!(3, queue.default_max_retries);
    assert_eq!(Duration::from_secs(300), queue.lease_timeout);
    assert_eq!(2, queue.retry.backoff_base);
    assert_eq!(Duration::from_millis(500), worker.poll_interval);
    assert_eq!(Duration::from_secs(1), worker.error_backoff);
    Ok(())
}
