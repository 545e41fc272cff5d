//! Reversal of single edit records.
//!
//! Dispatch is a closed match over [`EntityKind`]; each known entity has its
//! own handler module. Every handler
//! writes through the caller's [`UnitOfWork`] so the whole undo set commits
//! or rolls back together.

mod character;
mod developer;
mod game;

use editlog_core::{Actor, Changes, EditRecord, EntityKind, HlcClock, RelationType, permissions};
use editlog_storage::{ActivityDescriptor, ActivityKind, ActivityLog, Storage, UnitOfWork};

use crate::error::EngineError;

/// Everything an inverse needs: the open transaction, the activity
/// collaborator, who is undoing, and the clock stamping the undo record.
pub struct InverseContext<'a, 'conn> {
    pub uow: &'a mut UnitOfWork<'conn>,
    pub activity: &'a dyn ActivityLog,
    pub actor: &'a Actor,
    pub clock: &'a mut HlcClock,
}

/// Reverse `record` and return the undo record written for it.
pub fn apply_inverse(
    ctx: &mut InverseContext<'_, '_>,
    record: &EditRecord,
) -> Result<EditRecord, EngineError> {
    tracing::debug!(edit = %record.id, action = record.action.as_str(), "applying inverse");
    match &record.entity {
        EntityKind::Game => game::apply(ctx, record),
        EntityKind::Developer => developer::apply(ctx, record),
        EntityKind::Character => character::apply(ctx, record),
        EntityKind::Other(name) => Err(EngineError::NotImplemented(format!(
            "no inverse for entity {name}"
        ))),
    }
}

fn no_inverse(record: &EditRecord) -> EngineError {
    EngineError::NotImplemented(format!(
        "no inverse for {} on {}",
        record.action.as_str(),
        record.entity
    ))
}

/// The record's relation type, checked against what the entity carries.
fn relation_type_of(record: &EditRecord) -> Result<RelationType, EngineError> {
    match record.relation_type {
        Some(rt) if permissions::supports_relation(&record.entity, rt) => Ok(rt),
        Some(rt) => Err(EngineError::NotImplemented(format!(
            "{} has no {} relation",
            record.entity,
            rt.relation_name()
        ))),
        None => Err(EngineError::InvalidEdit(format!(
            "relation edit {} has no relation type",
            record.id
        ))),
    }
}

fn require_entity(ctx: &InverseContext<'_, '_>, record: &EditRecord) -> Result<(), EngineError> {
    match ctx.uow.get_entity(&record.entity, record.target_id)? {
        Some(_) => Ok(()),
        None => Err(EngineError::NotFound(format!(
            "{} {}",
            record.entity, record.target_id
        ))),
    }
}

/// Write `changes.before` back onto the live entity.
fn revert_scalar(
    ctx: &mut InverseContext<'_, '_>,
    record: &EditRecord,
) -> Result<EditRecord, EngineError> {
    let Changes::Scalar { before, .. } = &record.changes else {
        return Err(EngineError::InvalidEdit(format!(
            "scalar edit {} carries relation changes",
            record.id
        )));
    };
    require_entity(ctx, record)?;
    ctx.uow.write_fields(&record.entity, record.target_id, before)?;
    write_undo_record(ctx, record)
}

/// Delete every item the record added: by id when the item has one,
/// otherwise by its exact distinguishing values.
fn revert_added_items(
    ctx: &mut InverseContext<'_, '_>,
    record: &EditRecord,
    relation_type: RelationType,
) -> Result<EditRecord, EngineError> {
    let added = match &record.changes {
        Changes::Relation(rc) => rc.added.as_deref().unwrap_or_default(),
        Changes::Scalar { .. } => {
            return Err(EngineError::InvalidEdit(format!(
                "relation edit {} carries scalar changes",
                record.id
            )));
        }
    };
    if added.is_empty() {
        return Err(no_inverse(record));
    }
    require_entity(ctx, record)?;

    for item in added {
        let deleted = match item.id {
            Some(id) => ctx
                .uow
                .delete_relation_by_id(&record.entity, record.target_id, relation_type, id)?,
            None => ctx.uow.delete_relation_by_values(
                &record.entity,
                record.target_id,
                relation_type,
                &item.value_tuple(relation_type),
            )?,
        };
        if deleted == 0 {
            tracing::debug!(edit = %record.id, "added relation item already gone");
        }
    }
    write_undo_record(ctx, record)
}

fn write_undo_record(
    ctx: &mut InverseContext<'_, '_>,
    original: &EditRecord,
) -> Result<EditRecord, EngineError> {
    let created = ctx.clock.tick()?;
    let undo = EditRecord::reversal_of(original, ctx.actor, created);
    ctx.uow.append_edit(&undo)?;

    let descriptor = ActivityDescriptor {
        kind: ActivityKind::EditUndone,
        entity: undo.entity.clone(),
        target_id: undo.target_id,
        actor_id: ctx.actor.id,
        edit_id: undo.id,
        detail: Some(format!("undo of {}", original.id)),
    };
    ctx.activity.record(&descriptor, ctx.uow)?;
    Ok(undo)
}
