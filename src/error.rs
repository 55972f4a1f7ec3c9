//! Error types for batchq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no task capability registered for type: {0}")]
    UnknownTaskType(String),

    #[error("no processor registered for task type: {0}")]
    MissingProcessor(String),
}

pub type Result<T> = std::result::Result<T, Error>;
