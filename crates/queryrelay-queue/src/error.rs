use thiserror::Error;

use queryrelay_core::QueuedUnitId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queued unit {0}")]
    NotFound(QueuedUnitId),

    #[error("queue is shutting down")]
    ShuttingDown,
}

pub type QueueResult<T> = Result<T, QueueError>;
