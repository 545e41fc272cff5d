//! Static permission-bit tables.
//!
//! Every editable field and relation belongs to exactly one permission group;
//! a change requires the bit of every group it touches. The tables are plain
//! constants and the lookups are pure.

use crate::error::CoreError;
use crate::field_mask::FieldMask;
use crate::record::{EntityKind, RelationType};

type Table = &'static [(&'static str, u32)];

const GAME_FIELDS: Table = &[
    ("title", 1),
    ("title_jp", 1),
    ("title_romaji", 1),
    ("aliases", 1),
    ("description", 2),
    ("description_jp", 2),
    ("release_date", 3),
    ("release_status", 3),
    ("platforms", 3),
    ("age_rating", 4),
    ("content_warnings", 4),
    ("tags", 4),
    ("engine", 5),
    ("languages", 5),
    ("official_site", 5),
];

const GAME_RELATIONS: Table = &[
    ("links", 10),
    ("images", 11),
    ("covers", 12),
    ("developers", 13),
    ("characters", 14),
];

const DEVELOPER_FIELDS: Table = &[
    ("name", 1),
    ("name_jp", 1),
    ("aliases", 1),
    ("description", 2),
    ("founded", 3),
    ("country", 3),
    ("website", 3),
];

const DEVELOPER_RELATIONS: Table = &[("links", 10), ("images", 11)];

const CHARACTER_FIELDS: Table = &[
    ("name", 1),
    ("name_jp", 1),
    ("aliases", 1),
    ("description", 2),
    ("gender", 3),
    ("birthday", 3),
    ("age", 3),
    ("height", 3),
    ("blood_type", 3),
];

const CHARACTER_RELATIONS: Table = &[("links", 10), ("images", 11)];

/// What a change touched: scalar fields, or one relation by name.
#[derive(Debug, Clone, Copy)]
pub enum Touched<'a> {
    Fields(&'a [String]),
    Relation(&'a str),
}

fn tables(entity: &EntityKind) -> Result<(Table, Table), CoreError> {
    match entity {
        EntityKind::Game => Ok((GAME_FIELDS, GAME_RELATIONS)),
        EntityKind::Developer => Ok((DEVELOPER_FIELDS, DEVELOPER_RELATIONS)),
        EntityKind::Character => Ok((CHARACTER_FIELDS, CHARACTER_RELATIONS)),
        EntityKind::Other(name) => Err(CoreError::UnsupportedEntity(name.clone())),
    }
}

fn lookup(table: Table, key: &str) -> Option<u32> {
    table.iter().find(|(k, _)| *k == key).map(|(_, bit)| *bit)
}

/// Bit indices required by `touched`, ascending, one per group.
pub fn required_bits(entity: &EntityKind, touched: Touched<'_>) -> Result<Vec<u32>, CoreError> {
    let (fields, relations) = tables(entity)?;
    let mut bits = match touched {
        Touched::Fields(names) => names
            .iter()
            .map(|name| {
                lookup(fields, name).ok_or_else(|| CoreError::UnknownField {
                    entity: entity.to_string(),
                    field: name.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Touched::Relation(name) => {
            vec![lookup(relations, name).ok_or_else(|| CoreError::UnknownRelation {
                entity: entity.to_string(),
                relation: name.to_string(),
            })?]
        }
    };
    bits.sort_unstable();
    bits.dedup();
    Ok(bits)
}

pub fn field_mask(entity: &EntityKind, touched: Touched<'_>) -> Result<FieldMask, CoreError> {
    Ok(FieldMask::from_bits(&required_bits(entity, touched)?))
}

/// Whether `entity` carries `relation_type` at all.
pub fn supports_relation(entity: &EntityKind, relation_type: RelationType) -> bool {
    tables(entity)
        .map(|(_, relations)| lookup(relations, relation_type.relation_name()).is_some())
        .unwrap_or(false)
}
