use std::time::Duration;

use thiserror::Error;

use queryrelay_core::ConnectionId;

/// Driver-level query failure, with a distinct `Timeout` subkind.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("query failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("connect failed for connection {connection}: {reason}")]
    ConnectFailed {
        connection: ConnectionId,
        reason: String,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("progress stream error: {0}")]
    State(#[from] queryrelay_state::StateError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
