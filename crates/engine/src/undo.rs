//! Undo planning: validation, conflict scan, and the order in which
//! reversals are applied.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use editlog_core::{EditId, EditRecord, is_overlap};
use editlog_storage::Storage;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndoMode {
    /// Refuse when later edits overlap, unless forced.
    #[default]
    Strict,
    /// Undo every overlapping later edit first, newest to oldest.
    Cascade,
}

impl UndoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Cascade => "cascade",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoOptions {
    pub mode: UndoMode,
    pub force: bool,
    pub dry_run: bool,
}

impl UndoOptions {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn cascade() -> Self {
        Self {
            mode: UndoMode::Cascade,
            ..Self::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// What an undo will do. `will_undo` starts with the target, followed by the
/// overlapping edits newest first; `conflicts` lists every overlapping edit
/// oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoPlan {
    pub target: EditId,
    pub mode: UndoMode,
    pub will_undo: Vec<EditId>,
    pub conflicts: Vec<EditId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoReport {
    pub plan: UndoPlan,
    /// New undo records, in the order they were written.
    pub undo_records: Vec<EditId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    DryRun(UndoPlan),
    Applied(UndoReport),
}

impl UndoOutcome {
    pub fn plan(&self) -> &UndoPlan {
        match self {
            Self::DryRun(plan) => plan,
            Self::Applied(report) => &report.plan,
        }
    }
}

/// A plan together with the records it will reverse.
#[derive(Debug, Clone)]
pub struct PreparedUndo {
    pub plan: UndoPlan,
    pub target: EditRecord,
    /// Overlapping records to reverse before the target, newest first.
    pub cascade: Vec<EditRecord>,
}

impl PreparedUndo {
    pub fn apply_order(&self) -> impl Iterator<Item = &EditRecord> {
        self.cascade.iter().chain(std::iter::once(&self.target))
    }
}

/// Load the target and refuse it if it has already been reversed.
pub fn validate<S: Storage + ?Sized>(storage: &S, edit_id: EditId) -> Result<EditRecord, EngineError> {
    let target = storage
        .get_edit(edit_id)?
        .ok_or_else(|| EngineError::NotFound(format!("edit record {edit_id}")))?;
    if let Some(undo) = storage.find_undo_of(target.id)? {
        return Err(EngineError::AlreadyUndone {
            target: target.id,
            undone_by: undo.id,
        });
    }
    Ok(target)
}

/// Later records on the same entity instance that overlap `target`,
/// ascending by `created`.
pub fn scan_overlaps<S: Storage + ?Sized>(
    storage: &S,
    target: &EditRecord,
) -> Result<Vec<EditRecord>, EngineError> {
    let later = storage.get_edits_after(&target.entity, target.target_id, target.created)?;
    Ok(later
        .into_iter()
        .filter(|candidate| candidate.id != target.id && is_overlap(target, candidate))
        .collect())
}

/// Decide what the undo will do. Strict mode without `force` fails here when
/// anything overlaps, before any transaction is opened.
pub fn prepare<S: Storage + ?Sized>(
    storage: &S,
    target: EditRecord,
    overlapping: Vec<EditRecord>,
    options: &UndoOptions,
) -> Result<PreparedUndo, EngineError> {
    let conflicts: Vec<EditId> = overlapping.iter().map(|r| r.id).collect();

    let cascade = match options.mode {
        UndoMode::Strict => {
            if !conflicts.is_empty() && !options.force {
                return Err(EngineError::Conflict {
                    target: target.id,
                    overlapping: conflicts,
                });
            }
            Vec::new()
        }
        UndoMode::Cascade => {
            let mut in_effect = Vec::with_capacity(overlapping.len());
            {
                let by_id: HashMap<EditId, &EditRecord> =
                    overlapping.iter().map(|r| (r.id, r)).collect();
                for record in &overlapping {
                    // Already reversed; reversing it again would give it two undo records.
                    let undone = storage.find_undo_of(record.id)?.is_some();
                    // An undo of an overlapping edit cancels that edit out; an
                    // undo of the undo puts it back in effect.
                    in_effect.push(!undone && undo_depth(record, &by_id) % 2 == 0);
                }
            }
            let mut live: Vec<EditRecord> = overlapping
                .into_iter()
                .zip(in_effect)
                .filter_map(|(record, keep)| keep.then_some(record))
                .collect();
            live.reverse();
            live
        }
    };

    let mut will_undo = Vec::with_capacity(cascade.len() + 1);
    will_undo.push(target.id);
    will_undo.extend(cascade.iter().map(|r| r.id));

    Ok(PreparedUndo {
        plan: UndoPlan {
            target: target.id,
            mode: options.mode,
            will_undo,
            conflicts,
        },
        target,
        cascade,
    })
}

/// How many `undo_of` links lead from `record` to other records in the same
/// overlap set.
fn undo_depth(record: &EditRecord, by_id: &HashMap<EditId, &EditRecord>) -> usize {
    let mut depth = 0;
    let mut current = record;
    while let Some(original) = current.undo_of.and_then(|id| by_id.get(&id)) {
        depth += 1;
        current = original;
    }
    depth
}

/// Re-run validation inside the apply transaction. Fails if any record in
/// the plan gained an undo record, or a new overlapping edit appeared that
/// the plan does not account for.
pub fn recheck<S: Storage + ?Sized>(
    storage: &S,
    prepared: &PreparedUndo,
    options: &UndoOptions,
) -> Result<(), EngineError> {
    for record in prepared.apply_order() {
        if let Some(undo) = storage.find_undo_of(record.id)? {
            return Err(EngineError::AlreadyUndone {
                target: record.id,
                undone_by: undo.id,
            });
        }
    }

    if options.mode == UndoMode::Strict && options.force {
        return Ok(());
    }

    let fresh: Vec<EditId> = scan_overlaps(storage, &prepared.target)?
        .into_iter()
        .map(|r| r.id)
        .filter(|id| !prepared.plan.conflicts.contains(id))
        .collect();
    if !fresh.is_empty() {
        return Err(EngineError::Conflict {
            target: prepared.target.id,
            overlapping: fresh,
        });
    }
    Ok(())
}
