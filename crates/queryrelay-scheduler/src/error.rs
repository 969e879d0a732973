//! Error taxonomy for the scheduler.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("persistence error: {0}")]
    Io(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<std::io::Error> for SchedulerError {
    fn from(e: std::io::Error) -> Self {
        SchedulerError::Io(e.to_string())
    }
}
