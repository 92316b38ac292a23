use std::time::Duration;

/// Outcome-driven transition of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Completed,
    Retry { attempts: i32, delay: Duration },
    Dead { attempts: i32 },
}

/// Exponential retry policy: attempt `k` waits `base^k` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRetry {
    pub backoff_base: u32,
}

impl Default for JobRetry {
    fn default() -> Self {
        JobRetry { backoff_base: 2 }
    }
}

impl JobRetry {
    pub const fn new(backoff_base: u32) -> Self {
        JobRetry { backoff_base }
    }

    pub fn delay_for(self, attempt: i32) -> Duration {
        let exp = u32::try_from(attempt).unwrap_or(0);
        Duration::from_secs(u64::from(self.backoff_base).saturating_pow(exp))
    }

    pub fn decide(self, attempts: i32, max_retries: i32, success: bool) -> JobTransition {
        if success {
            return JobTransition::Completed;
        }
        let attempts = attempts.saturating_add(1);
        if attempts >= max_retries {
            return JobTransition::Dead { attempts };
        }
        JobTransition::Retry {
            attempts,
            delay: self.delay_for(attempts),
        }
    }
}

#[tokio::test]
async fn job_retry_delay_is_power_of_base() -> anyhow::Result<()> {
    // arrange
    let retry = JobRetry::default();

    // act & assert
    assert_eq!(Duration::from_secs(2), retry.delay_for(1));
    assert_eq!(Duration::from_secs(4), retry.delay_for(2));
    assert_eq!(Duration::from_secs(8), retry.delay_for(3));
    assert_eq!(Duration::from_secs(81), JobRetry::new(3).delay_for(4));
    Ok(())
}

#[tokio::test]
async fn job_retry_delay_saturates() -> anyhow::Result<()> {
    // arrange
    let retry = JobRetry::new(10);

    // act
    let delay = retry.delay_for(100);

    // assert
    assert_eq!(Duration::from_secs(u64::MAX), delay);
    Ok(())
}

#[tokio::test]
async fn job_retry_success_completes() -> anyhow::Result<()> {
    // act & assert
    assert_eq!(
        JobTransition::Completed,
        JobRetry::default().decide(2, 3, true)
    );
    Ok(())
}

#[tokio::test]
async fn job_retry_until_exhausted() -> anyhow::Result<()> {
    // arrange
    let retry = JobRetry::default();

    // act & assert
    assert_eq!(
        JobTransition::Retry {
            attempts: 1,
            delay: Duration::from_secs(2)
        },
        retry.decide(0, 3, false)
    );
    assert_eq!(
        JobTransition::Retry {
            attempts: 2,
            delay: Duration::from_secs(4)
        },
        retry.decide(1, 3, false)
    );
    assert_eq!(
        JobTransition::Dead { attempts: 3 },
        retry.decide(2, 3, false)
    );
    Ok(())
}

#[tokio::test]
async fn job_retry_single_attempt_goes_straight_to_dead() -> anyhow::Result<()> {
    // act
    let transition = JobRetry::default().decide(0, 1, false);

    // assert
    assert_eq!(JobTransition::Dead { attempts: 1 }, transition);
    Ok(())
}

#[tokio::test]
async fn job_retry_attempts_never_exceed_ceiling() -> anyhow::Result<()> {
    // arrange
    let retry = JobRetry::default();

    // act & assert
    for max_retries in 1..8 {
        let mut attempts = 0;
        loop {
            match retry.decide(attempts, max_retries, false) {
                JobTransition::Retry { attempts: next, .. } => {
                    assert!(next < max_retries);
                    attempts = next;
                }
                JobTransition::Dead { attempts: last } => {
                    assert_eq!(max_retries, last);
                    break;
                }
                JobTransition::Completed => unreachable!(),
            }
        }
    }
    Ok(())
}
