use editlog_core::{ids::*, record::EntityKind};

use crate::error::StorageError;
use crate::sqlite::UnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    EditCreated,
    EditUndone,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EditCreated => "edit.created",
            Self::EditUndone => "edit.undone",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "edit.created" => Ok(Self::EditCreated),
            "edit.undone" => Ok(Self::EditUndone),
            _ => Err(StorageError::Serialization(format!("unknown activity kind: {s}"))),
        }
    }
}

/// What happened, to which entity, credited to whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDescriptor {
    pub kind: ActivityKind,
    pub entity: EntityKind,
    pub target_id: TargetId,
    pub actor_id: UserId,
    pub edit_id: EditId,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub seq: i64,
    pub descriptor: ActivityDescriptor,
}

/// Activity feed collaborator. Entries are written through the caller's
/// unit of work and commit or roll back with it.
pub trait ActivityLog {
    fn record(
        &self,
        descriptor: &ActivityDescriptor,
        uow: &mut UnitOfWork<'_>,
    ) -> Result<(), StorageError>;
}

/// Writes activity entries to the `activities` table of the same database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteActivityLog;

impl ActivityLog for SqliteActivityLog {
    fn record(
        &self,
        descriptor: &ActivityDescriptor,
        uow: &mut UnitOfWork<'_>,
    ) -> Result<(), StorageError> {
        uow.insert_activity(descriptor)?;
        Ok(())
    }
}
