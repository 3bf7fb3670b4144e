use std::io;
use thiserror::Error;

/// Errors raised while building datasets, pulling from iterators, or
/// checkpointing them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("data loss: {0}")]
    DataLoss(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot encode or decode state: {0}")]
    Encoding(#[from] serde_json::Error),
}
