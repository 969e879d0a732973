use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter {0} rejected destination kind {1:?}")]
    KindMismatch(&'static str, queryrelay_core::DestinationKind),

    #[error("adapter failed: {0}")]
    Failed(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
