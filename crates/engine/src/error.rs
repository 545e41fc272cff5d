use editlog_core::{CoreError, EditId};
use editlog_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("edit {target} already undone by {undone_by}")]
    AlreadyUndone { target: EditId, undone_by: EditId },

    #[error("edit {target} has {} overlapping later edits", .overlapping.len())]
    Conflict {
        target: EditId,
        overlapping: Vec<EditId>,
    },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::Storage(StorageError::NotFound(_)) => "NOT_FOUND",
            Self::AlreadyUndone { .. } => "ALREADY_UNDONE",
            Self::Conflict { .. } => "CONFLICT",
            Self::NotImplemented(_) | Self::Core(CoreError::UnsupportedEntity(_)) => {
                "NOT_IMPLEMENTED"
            }
            Self::InvalidEdit(_)
            | Self::Core(CoreError::UnknownField { .. })
            | Self::Core(CoreError::UnknownRelation { .. }) => "INVALID_EDIT",
            Self::Config(_) => "CONFIG",
            Self::Storage(_) => "STORAGE",
            Self::Core(_) => "INTERNAL",
        }
    }
}
