mod workerpool;

pub mod executor;
pub mod jobqueue;
pub mod jobrunner;

pub use jobqueue::JobQueue;
pub use workerpool::WorkerPool;
