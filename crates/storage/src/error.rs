use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The remote side refused the request (network failure, server error).
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("core error: {0}")]
    Core(#[from] assetline_core::CoreError),
}
