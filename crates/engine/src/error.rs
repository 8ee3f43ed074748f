use assetline_core::CoreError;
use assetline_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The mutation would break an invariant and was not applied.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("a drag is already in progress for {0}")]
    DragInProgress(String),

    #[error("no active drag")]
    NoActiveDrag,

    #[error("unknown mutation: {0}")]
    UnknownMutation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
