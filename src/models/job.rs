use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use super::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Completed,
        JobState::Dead,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or(Error::InvalidParams("state"))
    }
}

/// Filter for listing jobs: a single state or everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    All,
    State(JobState),
}

impl FromStr for StateFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(StateFilter::All),
            _ => s.parse().map(StateFilter::State),
        }
    }
}

impl From<JobState> for StateFilter {
    fn from(value: JobState) -> Self {
        StateFilter::State(value)
    }
}

/// Persisted job record. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct JobRow {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i32,
    pub max_retries: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub next_run_at: Option<i64>,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
}

impl JobRow {
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

/// Job submission as produced by the collaborator layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobCreate {
    pub id: Option<String>,
    pub command: String,
    pub max_retries: Option<i32>,
}

impl JobCreate {
    pub fn new(command: impl Into<String>) -> Self {
        JobCreate {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Checks the submission and fills in the id and retry ceiling.
    pub fn validate(self, default_max_retries: i32) -> Result<NewJob, Error> {
        if self.command.trim().is_empty() {
            return Err(Error::InvalidParams("command"));
        }
        let id = match self.id {
            Some(id) if id.trim().is_empty() => return Err(Error::InvalidParams("id")),
            Some(id) => id,
            None => ulid::Ulid::new().to_string(),
        };
        let max_retries = self.max_retries.unwrap_or(default_max_retries);
        if max_retries < 1 {
            return Err(Error::InvalidParams("max_retries"));
        }
        Ok(NewJob {
            id,
            command: self.command,
            max_retries,
        })
    }
}

/// A validated submission, ready for insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub max_retries: i32,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::test]
async fn job_state_from_str() -> anyhow::Result<()> {
    // act
    let state: JobState = "dead".parse()?;
    let unknown: Result<JobState, _> = "failed".parse();

    // assert
    assert_eq!(JobState::Dead, state);
    assert!(unknown.is_err());
    Ok(())
}

#[tokio::test]
async fn state_filter_from_str() -> anyhow::Result<()> {
    // act & assert
    assert_eq!(StateFilter::All, "all".parse()?);
    assert_eq!(StateFilter::State(JobState::Pending), "pending".parse()?);
    assert!("nope".parse::<StateFilter>().is_err());
    Ok(())
}

#[tokio::test]
async fn job_create_validate_defaults() -> anyhow::Result<()> {
    // arrange
    let job = JobCreate::new("echo hello");

    // act
    let new_job = job.validate(3)?;

    // assert
    assert_eq!("echo hello", new_job.command);
    assert_eq!(3, new_job.max_retries);
    assert_eq!(26, new_job.id.len());
    Ok(())
}

#[tokio::test]
async fn job_create_validate_keeps_caller_values() -> anyhow::Result<()> {
    // arrange
    let job = JobCreate::new("exit 1")
        .with_id("job-1")
        .with_max_retries(5);

    // act
    let new_job = job.validate(3)?;

    // assert
    assert_eq!("job-1", new_job.id);
    assert_eq!(5, new_job.max_retries);
    Ok(())
}

#[tokio::test]
async fn job_create_validate_rejects_missing_command() -> anyhow::Result<()> {
    // arrange
    let job: JobCreate = serde_json::from_str(r#"{"command": "  ", "max_retries": 2}"#)?;

    // act
    let res = job.validate(3);

    // assert
    assert!(matches!(res, Err(Error::InvalidParams("command"))));
    Ok(())
}

#[tokio::test]
async fn job_create_validate_rejects_zero_retries() -> anyhow::Result<()> {
    // arrange
    let job = JobCreate::new("true").with_max_retries(0);

    // act
    let res = job.validate(3);

    // assert
    assert!(matches!(res, Err(Error::InvalidParams("max_retries"))));
    Ok(())
}

#[tokio::test]
async fn job_create_from_json_without_command_fails() -> anyhow::Result<()> {
    // act
    let res = serde_json::from_str::<JobCreate>(r#"{"id": "a"}"#);

    // assert
    assert!(res.is_err());
    Ok(())
}
