use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::diff::FieldDiff;
use crate::error::CoreError;
use crate::field_mask::FieldMask;
use crate::field_value::FieldValue;
use crate::hlc::Hlc;
use crate::ids::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Game,
    Developer,
    Character,
    /// Entity kinds written by other parts of the platform. Carried through
    /// storage untouched; nothing in this crate knows how to reverse them.
    Other(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Game => "GAME",
            Self::Developer => "DEVELOPER",
            Self::Character => "CHARACTER",
            Self::Other(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "GAME" => Self::Game,
            "DEVELOPER" => Self::Developer,
            "CHARACTER" => Self::Character,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditAction {
    UpdateScalar,
    AddRelation,
    UpdateRelation,
    RemoveRelation,
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateScalar => "UPDATE_SCALAR",
            Self::AddRelation => "ADD_RELATION",
            Self::UpdateRelation => "UPDATE_RELATION",
            Self::RemoveRelation => "REMOVE_RELATION",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "UPDATE_SCALAR" => Ok(Self::UpdateScalar),
            "ADD_RELATION" => Ok(Self::AddRelation),
            "UPDATE_RELATION" => Ok(Self::UpdateRelation),
            "REMOVE_RELATION" => Ok(Self::RemoveRelation),
            _ => Err(CoreError::InvalidData(format!("unknown edit action: {s}"))),
        }
    }

    pub fn is_relation(&self) -> bool {
        !matches!(self, Self::UpdateScalar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    Link,
    Image,
    Cover,
    Developer,
    Character,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        Self::Link,
        Self::Image,
        Self::Cover,
        Self::Developer,
        Self::Character,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "LINK",
            Self::Image => "IMAGE",
            Self::Cover => "COVER",
            Self::Developer => "DEVELOPER",
            Self::Character => "CHARACTER",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| CoreError::InvalidData(format!("unknown relation type: {s}")))
    }

    /// Relation name as it appears in `changes.relation` and `field_changes`.
    pub fn relation_name(&self) -> &'static str {
        match self {
            Self::Link => "links",
            Self::Image => "images",
            Self::Cover => "covers",
            Self::Developer => "developers",
            Self::Character => "characters",
        }
    }

    /// Fields that identify an item recorded without a surrogate id.
    pub fn distinguishing_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Link => &["url", "label", "name"],
            Self::Image | Self::Cover => &["url", "caption"],
            Self::Developer => &["developer_id", "role"],
            Self::Character => &["character_id", "role"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorRole {
    Member,
    Editor,
    Moderator,
    Admin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Editor => "editor",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "member" => Ok(Self::Member),
            "editor" => Ok(Self::Editor),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            _ => Err(CoreError::InvalidData(format!("unknown actor role: {s}"))),
        }
    }
}

/// The user a change is credited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: i64, role: ActorRole) -> Self {
        Self {
            id: UserId::new(id),
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationItem {
    pub id: Option<ItemId>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// How two relation items are recognised as the same item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemIdentity {
    Id(ItemId),
    Values(Vec<FieldValue>),
}

impl RelationItem {
    pub fn with_id(id: i64) -> Self {
        Self {
            id: Some(ItemId::new(id)),
            fields: BTreeMap::new(),
        }
    }

    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self {
            id: None,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Values of the distinguishing fields in declaration order; missing
    /// fields read as `Null`.
    pub fn value_tuple(&self, relation_type: RelationType) -> Vec<FieldValue> {
        relation_type
            .distinguishing_fields()
            .iter()
            .map(|key| self.fields.get(*key).cloned().unwrap_or(FieldValue::Null))
            .collect()
    }

    pub fn identity(&self, relation_type: RelationType) -> ItemIdentity {
        match self.id {
            Some(id) => ItemIdentity::Id(id),
            None => ItemIdentity::Values(self.value_tuple(relation_type)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationChanges {
    pub relation: String,
    pub added: Option<Vec<RelationItem>>,
    pub removed: Option<Vec<RelationItem>>,
    pub before: Option<Vec<RelationItem>>,
    pub after: Option<Vec<RelationItem>>,
}

impl RelationChanges {
    /// Items named by an add/remove change, in recorded order.
    pub fn touched_items(&self) -> impl Iterator<Item = &RelationItem> {
        self.added
            .iter()
            .flatten()
            .chain(self.removed.iter().flatten())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Changes {
    Scalar {
        before: BTreeMap<String, FieldValue>,
        after: BTreeMap<String, FieldValue>,
    },
    Relation(RelationChanges),
}

impl Changes {
    /// The change that reverses this one.
    pub fn swapped(&self) -> Changes {
        match self {
            Self::Scalar { before, after } => Self::Scalar {
                before: after.clone(),
                after: before.clone(),
            },
            Self::Relation(rc) => Self::Relation(RelationChanges {
                relation: rc.relation.clone(),
                added: rc.removed.clone(),
                removed: rc.added.clone(),
                before: rc.after.clone(),
                after: rc.before.clone(),
            }),
        }
    }

    pub fn as_relation(&self) -> Option<&RelationChanges> {
        match self {
            Self::Relation(rc) => Some(rc),
            Self::Scalar { .. } => None,
        }
    }
}

/// One immutable entry in the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub id: EditId,
    pub entity: EntityKind,
    pub target_id: TargetId,
    pub action: EditAction,
    pub relation_type: Option<RelationType>,
    pub actor_id: UserId,
    pub actor_role: ActorRole,
    pub field_mask: FieldMask,
    pub changes: Changes,
    pub field_changes: Vec<String>,
    pub note: Option<String>,
    pub undo: bool,
    pub undo_of: Option<EditId>,
    pub created: Hlc,
    pub updated: Hlc,
}

impl EditRecord {
    /// A forward UPDATE_SCALAR record built from a non-empty diff.
    pub fn scalar(
        entity: EntityKind,
        target_id: TargetId,
        actor: &Actor,
        diff: FieldDiff,
        field_mask: FieldMask,
        created: Hlc,
    ) -> Self {
        Self {
            id: EditId::new(),
            entity,
            target_id,
            action: EditAction::UpdateScalar,
            relation_type: None,
            actor_id: actor.id,
            actor_role: actor.role,
            field_mask,
            changes: Changes::Scalar {
                before: diff.before,
                after: diff.after,
            },
            field_changes: diff.field_changes,
            note: None,
            undo: false,
            undo_of: None,
            created,
            updated: created,
        }
    }

    /// A forward relation record. `field_changes` is the single relation name.
    #[allow(clippy::too_many_arguments)]
    pub fn relation(
        entity: EntityKind,
        target_id: TargetId,
        actor: &Actor,
        action: EditAction,
        relation_type: RelationType,
        changes: RelationChanges,
        field_mask: FieldMask,
        created: Hlc,
    ) -> Self {
        Self {
            id: EditId::new(),
            entity,
            target_id,
            action,
            relation_type: Some(relation_type),
            actor_id: actor.id,
            actor_role: actor.role,
            field_mask,
            field_changes: vec![changes.relation.clone()],
            changes: Changes::Relation(changes),
            note: None,
            undo: false,
            undo_of: None,
            created,
            updated: created,
        }
    }

    /// The record written when `original` is reversed: same action, entity,
    /// mask and touched fields, with `changes` swapped and credited to `actor`.
    pub fn reversal_of(original: &EditRecord, actor: &Actor, created: Hlc) -> Self {
        Self {
            id: EditId::new(),
            entity: original.entity.clone(),
            target_id: original.target_id,
            action: original.action,
            relation_type: original.relation_type,
            actor_id: actor.id,
            actor_role: actor.role,
            field_mask: original.field_mask.clone(),
            changes: original.changes.swapped(),
            field_changes: original.field_changes.clone(),
            note: None,
            undo: true,
            undo_of: Some(original.id),
            created,
            updated: created,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_same_target(&self, other: &EditRecord) -> bool {
        self.entity == other.entity && self.target_id == other.target_id
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// blake3 over the msgpack encoding. Any mutation after write changes it.
    pub fn checksum(&self) -> Result<[u8; 32], CoreError> {
        let bytes = self.to_msgpack()?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}

impl Ord for EditRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.created
            .cmp(&other.created)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for EditRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
