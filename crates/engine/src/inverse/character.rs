use editlog_core::{EditAction, EditRecord};

use super::InverseContext;
use crate::error::EngineError;

pub(super) fn apply(
    ctx: &mut InverseContext<'_, '_>,
    record: &EditRecord,
) -> Result<EditRecord, EngineError> {
    match record.action {
        EditAction::UpdateScalar => super::revert_scalar(ctx, record),
        EditAction::AddRelation => {
            let relation_type = super::relation_type_of(record)?;
            super::revert_added_items(ctx, record, relation_type)
        }
        EditAction::UpdateRelation | EditAction::RemoveRelation => Err(super::no_inverse(record)),
    }
}
