use std::collections::BTreeMap;

use crate::field_value::FieldValue;

/// Fields of a candidate update whose value differs from the current entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldDiff {
    pub before: BTreeMap<String, FieldValue>,
    pub after: BTreeMap<String, FieldValue>,
    pub field_changes: Vec<String>,
}

impl FieldDiff {
    /// An empty diff must not produce an edit record.
    pub fn is_empty(&self) -> bool {
        self.field_changes.is_empty()
    }
}

/// Compare a partial update against the current snapshot. Only keys present
/// in `candidate` are considered; a key missing from `current` reads as
/// `Null`. `field_changes` follows key order.
pub fn compute_diff(
    candidate: &BTreeMap<String, FieldValue>,
    current: &BTreeMap<String, FieldValue>,
) -> FieldDiff {
    let mut diff = FieldDiff::default();
    for (key, next) in candidate {
        let prev = current.get(key).cloned().unwrap_or(FieldValue::Null);
        if prev == *next {
            continue;
        }
        diff.before.insert(key.clone(), prev);
        diff.after.insert(key.clone(), next.clone());
        diff.field_changes.push(key.clone());
    }
    diff
}
