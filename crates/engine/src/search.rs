use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use editlog_core::{EntityKind, FieldValue, RelationItem, RelationType, TargetId};
use editlog_storage::{Storage, StorageError};

#[derive(Debug, Error)]
#[error("search index error: {0}")]
pub struct IndexError(pub String);

/// The searchable projection of a game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchDocument {
    pub id: TargetId,
    pub fields: BTreeMap<String, FieldValue>,
    pub developer_ids: Vec<i64>,
    pub character_ids: Vec<i64>,
}

/// Search index collaborator. Upserts are keyed by `SearchDocument::id`.
pub trait SearchIndex: Send + Sync {
    fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError>;
}

/// Discards every document. Used when no index is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearchIndex;

impl SearchIndex for NoopSearchIndex {
    fn upsert(&self, _document: &SearchDocument) -> Result<(), IndexError> {
        Ok(())
    }
}

fn linked_ids(items: impl IntoIterator<Item = RelationItem>, key: &str) -> Vec<i64> {
    items
        .into_iter()
        .filter_map(|item| {
            item.fields
                .get(key)
                .and_then(FieldValue::as_integer)
                .or_else(|| item.id.map(|id| id.get()))
        })
        .collect()
}

/// Re-read a game and build its document. `None` when the game is gone.
pub fn build_game_document<S: Storage + ?Sized>(
    storage: &S,
    target_id: TargetId,
) -> Result<Option<SearchDocument>, StorageError> {
    let entity = EntityKind::Game;
    if storage.get_entity(&entity, target_id)?.is_none() {
        return Ok(None);
    }

    let fields = storage
        .get_fields(&entity, target_id)?
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect();
    let developers = storage.get_relations(&entity, target_id, RelationType::Developer)?;
    let characters = storage.get_relations(&entity, target_id, RelationType::Character)?;

    Ok(Some(SearchDocument {
        id: target_id,
        fields,
        developer_ids: linked_ids(developers.into_iter().map(|row| row.item), "developer_id"),
        character_ids: linked_ids(characters.into_iter().map(|row| row.item), "character_id"),
    }))
}
