pub mod config;
pub mod error;
pub mod inverse;
pub mod search;
pub mod undo;

pub use config::{DatabaseConfig, EngineConfig, UndoConfig};
pub use error::EngineError;
pub use search::{IndexError, NoopSearchIndex, SearchDocument, SearchIndex};
pub use undo::{UndoMode, UndoOptions, UndoOutcome, UndoPlan, UndoReport};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use editlog_core::{
    Actor, EditAction, EditId, EditRecord, EntityKind, FieldValue, Hlc, HlcClock,
    RelationChanges, RelationItem, RelationType, TargetId, compute_diff,
    permissions::{self, Touched},
};
use editlog_storage::{
    ActivityDescriptor, ActivityKind, ActivityLog, ActivityRecord, RelationRow,
    SqliteActivityLog, SqliteStorage, Storage, UnitOfWork,
};

use crate::inverse::InverseContext;

pub struct Engine {
    config: EngineConfig,
    clock: HlcClock,
    storage: SqliteStorage,
    search: Arc<dyn SearchIndex>,
    activity: Box<dyn ActivityLog>,
}

impl Engine {
    pub fn new(storage: SqliteStorage, config: EngineConfig) -> Self {
        Self {
            config,
            clock: HlcClock::new(),
            storage,
            search: Arc::new(NoopSearchIndex),
            activity: Box::new(SqliteActivityLog),
        }
    }

    /// Open the database named by `config` (in memory when it names none).
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_with_timeout(
            config.database.path.as_deref(),
            config.database.busy_timeout_ms,
        )?;
        Ok(Self::new(storage, config))
    }

    pub fn with_search_index(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = search;
        self
    }

    pub fn with_activity_log(mut self, activity: Box<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Options carrying the configured default mode.
    pub fn default_undo_options(&self) -> UndoOptions {
        UndoOptions {
            mode: self.config.undo.default_mode,
            ..UndoOptions::default()
        }
    }

    /// Next timestamp, strictly after every stored record.
    fn next_stamp(&mut self) -> Result<Hlc, EngineError> {
        if let Some(latest) = self.storage.latest_created()? {
            self.clock.observe(&latest);
        }
        Ok(self.clock.tick()?)
    }

    fn require_entity(&self, entity: &EntityKind, target_id: TargetId) -> Result<(), EngineError> {
        match self.storage.get_entity(entity, target_id)? {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(format!("{entity} {target_id}"))),
        }
    }

    /// Write the entity mutation, the record, and its activity entry in one
    /// transaction.
    fn commit_edit<F>(&mut self, record: EditRecord, mutate: F) -> Result<EditId, EngineError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<(), EngineError>,
    {
        let descriptor = ActivityDescriptor {
            kind: ActivityKind::EditCreated,
            entity: record.entity.clone(),
            target_id: record.target_id,
            actor_id: record.actor_id,
            edit_id: record.id,
            detail: record.note.clone(),
        };
        let activity = self.activity.as_ref();
        self.storage
            .run_in_transaction(|uow| -> Result<(), EngineError> {
                mutate(uow)?;
                uow.append_edit(&record)?;
                activity.record(&descriptor, uow)?;
                Ok(())
            })?;
        debug!(
            edit = %record.id,
            entity = %record.entity,
            target = %record.target_id,
            action = record.action.as_str(),
            "edit recorded"
        );
        Ok(record.id)
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Create an entity row with its initial fields. Not an edit: no record
    /// is written.
    pub fn register_entity(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<(), EngineError> {
        if !fields.is_empty() {
            let keys: Vec<String> = fields.keys().cloned().collect();
            permissions::required_bits(entity, Touched::Fields(&keys))?;
        }
        self.storage
            .run_in_transaction(|uow| -> Result<(), EngineError> {
                uow.create_entity(entity, target_id)?;
                uow.write_fields(entity, target_id, &fields)?;
                Ok(())
            })?;
        debug!(%entity, target = %target_id, "entity registered");
        Ok(())
    }

    /// Remove an entity with its fields and relations. History is kept.
    pub fn delete_entity(&mut self, entity: &EntityKind, target_id: TargetId) -> Result<(), EngineError> {
        let deleted = self
            .storage
            .run_in_transaction(|uow| uow.delete_entity(entity, target_id))?;
        if !deleted {
            return Err(EngineError::NotFound(format!("{entity} {target_id}")));
        }
        debug!(%entity, target = %target_id, "entity deleted");
        Ok(())
    }

    // ========================================================================
    // Forward Edits
    // ========================================================================

    /// Apply a partial field update. Returns `None` when nothing differs from
    /// the stored values; in that case nothing is written.
    pub fn update_fields(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        actor: &Actor,
        candidate: BTreeMap<String, FieldValue>,
        note: Option<&str>,
    ) -> Result<Option<EditId>, EngineError> {
        self.require_entity(entity, target_id)?;
        let current = self.storage.get_fields(entity, target_id)?;
        let diff = compute_diff(&candidate, &current);
        if diff.is_empty() {
            debug!(%entity, target = %target_id, "no changes, skipping record");
            return Ok(None);
        }

        let mask = permissions::field_mask(entity, Touched::Fields(&diff.field_changes))?;
        let after = diff.after.clone();
        let created = self.next_stamp()?;
        let record = annotate(
            EditRecord::scalar(entity.clone(), target_id, actor, diff, mask, created),
            note,
        );
        let id = self.commit_edit(record, |uow| {
            uow.write_fields(entity, target_id, &after)?;
            Ok(())
        })?;
        Ok(Some(id))
    }

    pub fn add_relation_items(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        actor: &Actor,
        relation_type: RelationType,
        items: Vec<RelationItem>,
        note: Option<&str>,
    ) -> Result<EditId, EngineError> {
        if items.is_empty() {
            return Err(EngineError::InvalidEdit("no relation items to add".into()));
        }
        let mask = permissions::field_mask(entity, Touched::Relation(relation_type.relation_name()))?;
        self.require_entity(entity, target_id)?;

        let created = self.next_stamp()?;
        let changes = RelationChanges {
            relation: relation_type.relation_name().to_string(),
            added: Some(items.clone()),
            ..RelationChanges::default()
        };
        let record = annotate(
            EditRecord::relation(
                entity.clone(),
                target_id,
                actor,
                EditAction::AddRelation,
                relation_type,
                changes,
                mask,
                created,
            ),
            note,
        );
        self.commit_edit(record, |uow| {
            for item in &items {
                uow.insert_relation(entity, target_id, relation_type, item)?;
            }
            Ok(())
        })
    }

    /// Remove items matched by id, or by distinguishing values when the item
    /// has no id. Every item must match at least one row.
    pub fn remove_relation_items(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        actor: &Actor,
        relation_type: RelationType,
        items: Vec<RelationItem>,
        note: Option<&str>,
    ) -> Result<EditId, EngineError> {
        if items.is_empty() {
            return Err(EngineError::InvalidEdit("no relation items to remove".into()));
        }
        let mask = permissions::field_mask(entity, Touched::Relation(relation_type.relation_name()))?;
        self.require_entity(entity, target_id)?;

        let created = self.next_stamp()?;
        let changes = RelationChanges {
            relation: relation_type.relation_name().to_string(),
            removed: Some(items.clone()),
            ..RelationChanges::default()
        };
        let record = annotate(
            EditRecord::relation(
                entity.clone(),
                target_id,
                actor,
                EditAction::RemoveRelation,
                relation_type,
                changes,
                mask,
                created,
            ),
            note,
        );
        self.commit_edit(record, |uow| {
            for item in &items {
                let deleted = match item.id {
                    Some(id) => uow.delete_relation_by_id(entity, target_id, relation_type, id)?,
                    None => uow.delete_relation_by_values(
                        entity,
                        target_id,
                        relation_type,
                        &item.value_tuple(relation_type),
                    )?,
                };
                if deleted == 0 {
                    return Err(EngineError::InvalidEdit(format!(
                        "{} item not present on {entity} {target_id}",
                        relation_type.relation_name()
                    )));
                }
            }
            Ok(())
        })
    }

    /// Replace the whole relation list. Returns `None` when `after` equals
    /// the stored list.
    pub fn replace_relation(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        actor: &Actor,
        relation_type: RelationType,
        after: Vec<RelationItem>,
        note: Option<&str>,
    ) -> Result<Option<EditId>, EngineError> {
        let mask = permissions::field_mask(entity, Touched::Relation(relation_type.relation_name()))?;
        self.require_entity(entity, target_id)?;

        let before: Vec<RelationItem> = self
            .storage
            .get_relations(entity, target_id, relation_type)?
            .into_iter()
            .map(|row| row.item)
            .collect();
        if before == after {
            debug!(%entity, target = %target_id, "no changes, skipping record");
            return Ok(None);
        }

        let created = self.next_stamp()?;
        let changes = RelationChanges {
            relation: relation_type.relation_name().to_string(),
            before: Some(before),
            after: Some(after.clone()),
            ..RelationChanges::default()
        };
        let record = annotate(
            EditRecord::relation(
                entity.clone(),
                target_id,
                actor,
                EditAction::UpdateRelation,
                relation_type,
                changes,
                mask,
                created,
            ),
            note,
        );
        let id = self.commit_edit(record, |uow| {
            uow.clear_relations(entity, target_id, relation_type)?;
            for item in &after {
                uow.insert_relation(entity, target_id, relation_type, item)?;
            }
            Ok(())
        })?;
        Ok(Some(id))
    }

    // ========================================================================
    // Undo
    // ========================================================================

    /// Reverse `edit_id` on behalf of `actor`.
    ///
    /// Strict mode fails with `Conflict` when later edits overlap, unless
    /// `force` is set; cascade mode reverses those edits first, newest to
    /// oldest. A dry run returns the plan without writing. Otherwise every
    /// reversal, undo record, and activity entry commits in one transaction,
    /// and a game's search document is refreshed afterwards.
    pub fn undo(
        &mut self,
        edit_id: EditId,
        actor: &Actor,
        options: UndoOptions,
    ) -> Result<UndoOutcome, EngineError> {
        let span = tracing::info_span!(
            "undo",
            target = %edit_id,
            mode = options.mode.as_str(),
            actor = %actor.id
        );
        let _enter = span.enter();

        let target = undo::validate(&self.storage, edit_id)?;
        let overlapping = undo::scan_overlaps(&self.storage, &target)?;
        let prepared = undo::prepare(&self.storage, target, overlapping, &options)?;
        debug!(
            will_undo = ?prepared.plan.will_undo,
            conflicts = ?prepared.plan.conflicts,
            "undo plan"
        );

        if options.dry_run {
            return Ok(UndoOutcome::DryRun(prepared.plan));
        }

        if options.mode == UndoMode::Strict && !prepared.plan.conflicts.is_empty() {
            warn!(
                conflicts = prepared.plan.conflicts.len(),
                "forced undo leaves overlapping edits in place"
            );
        }

        if let Some(latest) = self.storage.latest_created()? {
            self.clock.observe(&latest);
        }

        let recheck = self.config.undo.recheck_in_transaction;
        let activity = self.activity.as_ref();
        let clock = &mut self.clock;
        let undo_records = self
            .storage
            .run_in_transaction(|uow| -> Result<Vec<EditId>, EngineError> {
                if recheck {
                    undo::recheck(&*uow, &prepared, &options)?;
                }
                let mut ctx = InverseContext {
                    uow,
                    activity,
                    actor,
                    clock,
                };
                let mut written = Vec::with_capacity(prepared.plan.will_undo.len());
                for record in prepared.apply_order() {
                    written.push(inverse::apply_inverse(&mut ctx, record)?.id);
                }
                Ok(written)
            })?;
        info!(undone = undo_records.len(), "undo committed");

        self.refresh_search(&prepared.target);

        Ok(UndoOutcome::Applied(UndoReport {
            plan: prepared.plan,
            undo_records,
        }))
    }

    /// Push a fresh document for a game after a committed undo. Failures are
    /// logged and dropped; the undo stays committed.
    fn refresh_search(&self, target: &EditRecord) {
        if target.entity != EntityKind::Game {
            return;
        }
        match search::build_game_document(&self.storage, target.target_id) {
            Ok(Some(document)) => {
                if let Err(e) = self.search.upsert(&document) {
                    warn!(target = %target.target_id, error = %e, "search index refresh failed");
                }
            }
            Ok(None) => {
                debug!(target = %target.target_id, "game no longer exists, skipping index refresh");
            }
            Err(e) => {
                warn!(target = %target.target_id, error = %e, "could not build search document");
            }
        }
    }

    // ========================================================================
    // Query Pass-Through
    // ========================================================================

    pub fn history(&self, entity: &EntityKind, target_id: TargetId) -> Result<Vec<EditRecord>, EngineError> {
        Ok(self.storage.get_history(entity, target_id)?)
    }

    pub fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, EngineError> {
        Ok(self.storage.get_edit(edit_id)?)
    }

    pub fn get_fields(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<BTreeMap<String, FieldValue>, EngineError> {
        Ok(self.storage.get_fields(entity, target_id)?)
    }

    pub fn get_field(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, EngineError> {
        Ok(self.storage.get_fields(entity, target_id)?.remove(field_key))
    }

    pub fn get_relations(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
    ) -> Result<Vec<RelationRow>, EngineError> {
        Ok(self.storage.get_relations(entity, target_id, relation_type)?)
    }

    pub fn activities(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, EngineError> {
        Ok(self.storage.get_activities(entity, target_id)?)
    }
}

fn annotate(record: EditRecord, note: Option<&str>) -> EditRecord {
    match note {
        Some(note) => record.with_note(note),
        None => record,
    }
}
