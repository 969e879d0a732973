//! Shared error taxonomy. Individual crates define their own
//! `thiserror` enums for crate-local failure modes and convert into these
//! where a cross-crate boundary needs a stable vocabulary.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
