use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("connection {1} not found in job {0}")]
    ConnectionNotFound(String, String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("persistence error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StateResult<T> = Result<T, StateError>;
