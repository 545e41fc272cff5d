use std::collections::BTreeMap;

use editlog_core::{
    field_value::FieldValue,
    hlc::Hlc,
    ids::*,
    record::{EditRecord, EntityKind, RelationItem, RelationType},
};

use crate::activity::ActivityRecord;
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub entity: EntityKind,
    pub target_id: TargetId,
    pub created_at_ms: i64,
}

/// A live relation row. `row_id` is the store's own key; the item keeps the
/// id it was recorded with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRow {
    pub row_id: i64,
    pub relation_type: RelationType,
    pub item: RelationItem,
}

/// Read access to the change log and entity state, plus append-only insert
/// of edit records. Implemented by the store itself and by an open
/// [`UnitOfWork`](crate::UnitOfWork), so the same queries run inside or
/// outside a transaction.
pub trait Storage {
    fn append_edit(&mut self, record: &EditRecord) -> Result<(), StorageError>;

    fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError>;

    /// Records on `(entity, target_id)` created strictly after `after`,
    /// ascending by `created`.
    fn get_edits_after(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        after: Hlc,
    ) -> Result<Vec<EditRecord>, StorageError>;

    fn get_history(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<EditRecord>, StorageError>;

    /// The record reversing `edit_id`, if one was written.
    fn find_undo_of(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError>;

    fn edit_count(&self) -> Result<u64, StorageError>;

    fn latest_created(&self) -> Result<Option<Hlc>, StorageError>;

    fn get_entity(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Option<EntityRecord>, StorageError>;

    fn get_fields(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<BTreeMap<String, FieldValue>, StorageError>;

    fn get_relations(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
    ) -> Result<Vec<RelationRow>, StorageError>;

    fn get_activities(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, StorageError>;
}
