use std::collections::BTreeMap;
use std::sync::Arc;

use editlog_core::{
    Actor, ActorRole, EditAction, EditRecord, EntityKind, FieldDiff, FieldValue, Hlc,
    RelationChanges, RelationType, TargetId,
    hlc::physical_now,
    permissions::{self, Touched},
};
use editlog_engine::{Engine, EngineConfig, EngineError, SearchIndex};
use editlog_storage::{ActivityLog, Storage, StorageError};

use crate::collaborators::RecordingSearchIndex;

const HOUR_MS: u64 = 60 * 60 * 1000;
pub const MINUTE_MS: u64 = 60 * 1000;

/// An engine over a private in-memory database with a recording search
/// index, plus helpers that write history at chosen times.
pub struct TestSite {
    pub engine: Engine,
    pub index: Arc<RecordingSearchIndex>,
    /// Credited with records written by the `record_*` helpers.
    pub editor: Actor,
}

impl TestSite {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let index = Arc::new(RecordingSearchIndex::new());
        let engine = Engine::open(config)?.with_search_index(index.clone());
        Ok(Self {
            engine,
            index,
            editor: Actor::new(100, ActorRole::Editor),
        })
    }

    /// Replace the search index. `index` receives nothing afterwards.
    pub fn with_search_index(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.engine = self.engine.with_search_index(search);
        self
    }

    pub fn with_activity_log(mut self, activity: Box<dyn ActivityLog>) -> Self {
        self.engine = self.engine.with_activity_log(activity);
        self
    }

    /// One hour ago. Records stamped from here sort before anything the
    /// engine stamps with the real clock.
    pub fn base_time() -> Result<Hlc, Box<dyn std::error::Error>> {
        Ok(Hlc::new(physical_now()? - HOUR_MS, 0))
    }

    pub fn seed(
        &mut self,
        entity: &EntityKind,
        id: i64,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<TargetId, EngineError> {
        let target_id = TargetId::new(id);
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.engine.register_entity(entity, target_id, fields)?;
        Ok(target_id)
    }

    pub fn seed_game(
        &mut self,
        id: i64,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<TargetId, EngineError> {
        self.seed(&EntityKind::Game, id, fields)
    }

    /// Write `field: before -> after` to the entity and log it as a record
    /// created at `created`.
    pub fn record_scalar(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        field: &str,
        change: (FieldValue, FieldValue),
        created: Hlc,
    ) -> Result<EditRecord, EngineError> {
        let (before, after) = change;
        let diff = FieldDiff {
            before: BTreeMap::from([(field.to_string(), before)]),
            after: BTreeMap::from([(field.to_string(), after.clone())]),
            field_changes: vec![field.to_string()],
        };
        let mask = permissions::field_mask(entity, Touched::Fields(&diff.field_changes))?;
        let record = EditRecord::scalar(entity.clone(), target_id, &self.editor, diff, mask, created);

        let written = BTreeMap::from([(field.to_string(), after)]);
        self.engine
            .storage_mut()
            .run_in_transaction(|uow| -> Result<(), StorageError> {
                uow.write_fields(entity, target_id, &written)?;
                uow.append_edit(&record)
            })?;
        Ok(record)
    }

    /// Apply a relation change to the live rows and log it as a record
    /// created at `created`.
    pub fn record_relation(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        action: EditAction,
        relation_type: RelationType,
        changes: RelationChanges,
        created: Hlc,
    ) -> Result<EditRecord, EngineError> {
        let mask = permissions::field_mask(entity, Touched::Relation(relation_type.relation_name()))?;
        let changes = RelationChanges {
            relation: relation_type.relation_name().to_string(),
            ..changes
        };
        let record = EditRecord::relation(
            entity.clone(),
            target_id,
            &self.editor,
            action,
            relation_type,
            changes.clone(),
            mask,
            created,
        );

        self.engine
            .storage_mut()
            .run_in_transaction(|uow| -> Result<(), StorageError> {
                if action == EditAction::UpdateRelation {
                    uow.clear_relations(entity, target_id, relation_type)?;
                    for item in changes.after.iter().flatten() {
                        uow.insert_relation(entity, target_id, relation_type, item)?;
                    }
                }
                for item in changes.added.iter().flatten() {
                    uow.insert_relation(entity, target_id, relation_type, item)?;
                }
                for item in changes.removed.iter().flatten() {
                    match item.id {
                        Some(id) => uow.delete_relation_by_id(entity, target_id, relation_type, id)?,
                        None => uow.delete_relation_by_values(
                            entity,
                            target_id,
                            relation_type,
                            &item.value_tuple(relation_type),
                        )?,
                    };
                }
                uow.append_edit(&record)
            })?;
        Ok(record)
    }

    pub fn field(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        key: &str,
    ) -> Result<Option<FieldValue>, EngineError> {
        self.engine.get_field(entity, target_id, key)
    }

    pub fn edit_count(&self) -> Result<u64, EngineError> {
        Ok(self.engine.storage().edit_count()?)
    }

    pub fn transactions_begun(&self) -> u64 {
        self.engine.storage().transactions_begun()
    }
}
