use editlog_core::{CoreError, EditId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored blob did not decode, or had the wrong width.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate entity or edit id, or an update/delete against the
    /// append-only log.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The stored record no longer hashes to the checksum written with it.
    #[error("edit record {edit_id} does not match its checksum")]
    ChecksumMismatch { edit_id: EditId },

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}
