// region:    Error
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Duplicate Job - {0}")]
    DuplicateJob(String),

    #[error(transparent)]
    DbError(#[from] sqlx::Error),

    #[error("Invalid Params - {0}")]
    InvalidParams(&'static str),

    #[error("Invalid Config - {0}")]
    InvalidConfig(String),
}
// endregion: Error

impl Error {
    /// Maps a primary key violation on insert to `DuplicateJob`.
    pub fn from_insert(err: sqlx::Error, job_id: &str) -> Error {
        match &err {
            sqlx::Error::Database(db_err)
                // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE
                if db_err.is_unique_violation()
                    || matches!(db_err.code().as_deref(), Some("1555" | "2067")) =>
            {
                Error::DuplicateJob(job_id.to_owned())
            }
            _ => Error::DbError(err),
        }
    }
}

#[tokio::test]
async fn error_display_invalid_params() -> anyhow::Result<()> {
    // arrange
    let err = Error::InvalidParams("command");

    // act
    let s = err.to_string();

    // assert
    assert_eq!("Invalid Params - command", s);
    Ok(())
}

#[tokio::test]
async fn error_from_insert_passes_other_errors_through() -> anyhow::Result<()> {
    // arrange
    let err = sqlx::Error::RowNotFound;

    // act
    let mapped = Error::from_insert(err, "job-1");

    // assert
    assert!(matches!(mapped, Error::DbError(sqlx::Error::RowNotFound)));
    Ok(())
}
