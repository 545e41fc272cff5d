//! Decides whether two historical edits touch the same data.

use crate::record::{EditAction, EditRecord, ItemIdentity, RelationType};

/// True when `a` and `b` edit overlapping data on the same entity instance.
///
/// Scalar edits overlap on a shared field name. Relation edits overlap only
/// within one relation type: two UPDATE_RELATIONs always do; two add/remove
/// edits do when they name a common item. Scalar and relation edits never
/// overlap. The predicate is symmetric.
pub fn is_overlap(a: &EditRecord, b: &EditRecord) -> bool {
    if !a.is_same_target(b) {
        return false;
    }

    match (a.action, b.action) {
        (EditAction::UpdateScalar, EditAction::UpdateScalar) => a
            .field_changes
            .iter()
            .any(|field| b.field_changes.contains(field)),
        (EditAction::UpdateScalar, _) | (_, EditAction::UpdateScalar) => false,
        _ => relations_overlap(a, b),
    }
}

fn relations_overlap(a: &EditRecord, b: &EditRecord) -> bool {
    let relation_type = match (a.relation_type, b.relation_type) {
        (Some(x), Some(y)) if x == y => x,
        _ => return false,
    };

    match (a.action, b.action) {
        (EditAction::UpdateRelation, EditAction::UpdateRelation) => true,
        (EditAction::UpdateRelation, _) | (_, EditAction::UpdateRelation) => false,
        _ => {
            let left = identities(a, relation_type);
            let right = identities(b, relation_type);
            left.iter().any(|id| right.contains(id))
        }
    }
}

fn identities(record: &EditRecord, relation_type: RelationType) -> Vec<ItemIdentity> {
    record
        .changes
        .as_relation()
        .map(|rc| {
            rc.touched_items()
                .map(|item| item.identity(relation_type))
                .collect()
        })
        .unwrap_or_default()
}
