pub use error::Error;
pub use job::now_millis;
pub use job::JobCreate;
pub use job::JobRow;
pub use job::JobState;
pub use job::NewJob;
pub use job::StateFilter;
pub use jobretry::JobRetry;
pub use jobretry::JobTransition;
pub use state::AppState;
pub use state::QueueOptions;
pub use state::WorkerOptions;

mod error;
mod job;
mod jobretry;
mod state;
