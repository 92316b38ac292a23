use crate::{
    models::{Error, JobRow, JobTransition},
    services::{
        executor::{self, ExecOutcome},
        jobqueue::JobQueue,
    },
};
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Executes a claimed job and persists the resulting transition.
pub async fn job_run(
    queue: &JobQueue,
    worker_id: &str,
    job: &JobRow,
) -> Result<JobTransition, Error> {
    let job_id = job.id.as_str();
    debug!({ worker_id, job_id, attempts = job.attempts }, "==> run {}", job.command);
    let outcome = executor::execute(&job.command).await;
    processed(queue, worker_id, job, outcome).await
}

/// Applies the retry policy to `outcome` and writes it to the store.
pub async fn processed(
    queue: &JobQueue,
    worker_id: &str,
    job: &JobRow,
    outcome: ExecOutcome,
) -> Result<JobTransition, Error> {
    let job_id = job.id.as_str();
    let max_retries = job.max_retries;
    let transition = queue
        .options()
        .retry
        .decide(job.attempts, max_retries, outcome.success);
    let applied = match transition {
        JobTransition::Completed => {
            let applied = queue.complete(job, worker_id, &outcome.output).await?;
            info!({ worker_id, job_id }, "completed");
            applied
        }
        JobTransition::Retry { attempts, delay } => {
            let applied = queue
                .reschedule(job, worker_id, attempts, delay, &outcome.output)
                .await?;
            info!(
                { worker_id, job_id, attempts, max_retries },
                "failed, retrying in {}s",
                delay.as_secs()
            );
            applied
        }
        JobTransition::Dead { attempts } => {
            let applied = queue
                .bury(job, worker_id, attempts, &outcome.output)
                .await?;
            warn!({ worker_id, job_id, attempts, max_retries }, "moved to dead letter");
            applied
        }
    };
    if !applied {
        warn!({ worker_id, job_id }, "lease lost, outcome {:?} discarded", transition);
    }
    Ok(transition)
}
