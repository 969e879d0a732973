use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("no adapter registered for destination kind {0:?}")]
    NoAdapter(queryrelay_core::DestinationKind),

    #[error("persistence error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BufferResult<T> = Result<T, BufferError>;
