use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A policy with out-of-range time parts, or one that never comes due.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The Timed worker thread could not be spawned.
    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
