use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connect failed for {key}: {reason}")]
    ConnectFailed { key: String, reason: String },

    #[error("pool shut down")]
    ShutDown,
}

pub type PoolResult<T> = Result<T, PoolError>;
