use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use editlog_core::{
    field_mask::FieldMask,
    field_value::FieldValue,
    hlc::Hlc,
    ids::*,
    record::{ActorRole, Changes, EditAction, EditRecord, EntityKind, RelationItem, RelationType},
};

use crate::activity::{ActivityDescriptor, ActivityKind, ActivityRecord};
use crate::error::StorageError;
use crate::traits::{EntityRecord, RelationRow, Storage};

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

const EDIT_COLUMNS: &str = "edit_id, entity, target_id, action, relation_type, actor_id, actor_role, field_mask, changes, field_changes, note, is_undo, undo_of, created, updated, checksum";

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub struct SqliteStorage {
    conn: Connection,
    transactions_begun: u64,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with_timeout(Some(path), DEFAULT_BUSY_TIMEOUT_MS)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open_with_timeout(None, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// `None` opens a private in-memory database.
    pub fn open_with_timeout(path: Option<&str>, busy_timeout_ms: u32) -> Result<Self, StorageError> {
        let conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        crate::schema::init_schema(&conn, busy_timeout_ms)?;
        Ok(Self {
            conn,
            transactions_begun: 0,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Number of write transactions opened on this handle.
    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun
    }

    /// Run `f` inside one transaction. `Ok` commits; `Err` drops the
    /// transaction, which rolls every write back.
    pub fn run_in_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.transactions_begun += 1;
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        let mut uow = UnitOfWork { tx };
        match f(&mut uow) {
            Ok(value) => {
                uow.tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                tracing::debug!("transaction rolled back");
                Err(e)
            }
        }
    }
}

/// An open transaction. Every write made through it lands or is discarded
/// together.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl UnitOfWork<'_> {
    pub fn create_entity(&mut self, entity: &EntityKind, target_id: TargetId) -> Result<(), StorageError> {
        let result = self.tx.execute(
            "INSERT INTO entities (entity, entity_id) VALUES (?1, ?2)",
            params![entity.as_str(), target_id.get()],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(format!(
                    "{entity} {target_id} already exists"
                )))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    /// Removes the entity together with its fields and relation rows.
    pub fn delete_entity(&mut self, entity: &EntityKind, target_id: TargetId) -> Result<bool, StorageError> {
        let deleted = self.tx.execute(
            "DELETE FROM entities WHERE entity = ?1 AND entity_id = ?2",
            params![entity.as_str(), target_id.get()],
        )?;
        Ok(deleted > 0)
    }

    /// Upsert each field. `Null` is stored as a value, not as absence.
    pub fn write_fields(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<(), StorageError> {
        for (key, value) in fields {
            let value_bytes = encode(value)?;
            self.tx.execute(
                "INSERT INTO fields (entity, entity_id, field_key, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity, entity_id, field_key) DO UPDATE SET value = excluded.value",
                params![entity.as_str(), target_id.get(), key, value_bytes],
            )?;
        }
        Ok(())
    }

    pub fn insert_relation(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
        item: &RelationItem,
    ) -> Result<i64, StorageError> {
        self.tx.execute(
            "INSERT INTO relations (entity, entity_id, relation_type, item_id, item, value_tuple) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entity.as_str(),
                target_id.get(),
                relation_type.as_str(),
                item.id.map(|id| id.get()),
                encode(item)?,
                encode(&item.value_tuple(relation_type))?,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn delete_relation_by_id(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
        item_id: ItemId,
    ) -> Result<usize, StorageError> {
        let deleted = self.tx.execute(
            "DELETE FROM relations WHERE entity = ?1 AND entity_id = ?2 AND relation_type = ?3 AND item_id = ?4",
            params![entity.as_str(), target_id.get(), relation_type.as_str(), item_id.get()],
        )?;
        Ok(deleted)
    }

    /// Deletes every row whose distinguishing values equal `values` exactly.
    pub fn delete_relation_by_values(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
        values: &[FieldValue],
    ) -> Result<usize, StorageError> {
        let deleted = self.tx.execute(
            "DELETE FROM relations WHERE entity = ?1 AND entity_id = ?2 AND relation_type = ?3 AND value_tuple = ?4",
            params![
                entity.as_str(),
                target_id.get(),
                relation_type.as_str(),
                encode(&values)?,
            ],
        )?;
        Ok(deleted)
    }

    pub fn clear_relations(
        &mut self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
    ) -> Result<usize, StorageError> {
        let deleted = self.tx.execute(
            "DELETE FROM relations WHERE entity = ?1 AND entity_id = ?2 AND relation_type = ?3",
            params![entity.as_str(), target_id.get(), relation_type.as_str()],
        )?;
        Ok(deleted)
    }

    pub fn insert_activity(&mut self, descriptor: &ActivityDescriptor) -> Result<i64, StorageError> {
        self.tx.execute(
            "INSERT INTO activities (kind, entity, target_id, actor_id, edit_id, detail) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                descriptor.kind.as_str(),
                descriptor.entity.as_str(),
                descriptor.target_id.get(),
                descriptor.actor_id.get(),
                descriptor.edit_id.as_bytes().as_slice(),
                descriptor.detail,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }
}

fn read_edit(row: &rusqlite::Row) -> Result<EditRecord, StorageError> {
    let edit_id_bytes: Vec<u8> = row.get(0)?;
    let entity: String = row.get(1)?;
    let target_id: i64 = row.get(2)?;
    let action: String = row.get(3)?;
    let relation_type: Option<String> = row.get(4)?;
    let actor_id: i64 = row.get(5)?;
    let actor_role: String = row.get(6)?;
    let field_mask: String = row.get(7)?;
    let changes_bytes: Vec<u8> = row.get(8)?;
    let field_changes_bytes: Vec<u8> = row.get(9)?;
    let note: Option<String> = row.get(10)?;
    let undo: bool = row.get(11)?;
    let undo_of_bytes: Option<Vec<u8>> = row.get(12)?;
    let created_bytes: Vec<u8> = row.get(13)?;
    let updated_bytes: Vec<u8> = row.get(14)?;
    let checksum_bytes: Vec<u8> = row.get(15)?;

    let undo_of = match undo_of_bytes {
        Some(bytes) => Some(EditId::from_bytes(to_array::<16>(bytes, "undo_of")?)),
        None => None,
    };
    let changes: Changes = decode(&changes_bytes)?;
    let field_changes: Vec<String> = decode(&field_changes_bytes)?;

    let record = EditRecord {
        id: EditId::from_bytes(to_array::<16>(edit_id_bytes, "edit_id")?),
        entity: EntityKind::parse(&entity),
        target_id: TargetId::new(target_id),
        action: EditAction::parse(&action)?,
        relation_type: relation_type.as_deref().map(RelationType::parse).transpose()?,
        actor_id: UserId::new(actor_id),
        actor_role: ActorRole::parse(&actor_role)?,
        field_mask: FieldMask::from_hex(&field_mask)?,
        changes,
        field_changes,
        note,
        undo,
        undo_of,
        created: Hlc::from_bytes(&to_array::<12>(created_bytes, "created")?),
        updated: Hlc::from_bytes(&to_array::<12>(updated_bytes, "updated")?),
    };

    let stored = to_array::<32>(checksum_bytes, "checksum")?;
    if record.checksum()? != stored {
        return Err(StorageError::ChecksumMismatch { edit_id: record.id });
    }
    Ok(record)
}

fn read_activity(row: &rusqlite::Row) -> Result<ActivityRecord, StorageError> {
    let seq: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    let entity: String = row.get(2)?;
    let target_id: i64 = row.get(3)?;
    let actor_id: i64 = row.get(4)?;
    let edit_id_bytes: Vec<u8> = row.get(5)?;
    let detail: Option<String> = row.get(6)?;
    Ok(ActivityRecord {
        seq,
        descriptor: ActivityDescriptor {
            kind: ActivityKind::parse(&kind)?,
            entity: EntityKind::parse(&entity),
            target_id: TargetId::new(target_id),
            actor_id: UserId::new(actor_id),
            edit_id: EditId::from_bytes(to_array::<16>(edit_id_bytes, "edit_id")?),
            detail,
        },
    })
}

fn insert_edit(conn: &Connection, record: &EditRecord) -> Result<(), StorageError> {
    let checksum = record.checksum()?;
    let result = conn.execute(
        &format!(
            "INSERT INTO edit_records ({EDIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            record.id.as_bytes().as_slice(),
            record.entity.as_str(),
            record.target_id.get(),
            record.action.as_str(),
            record.relation_type.map(|rt| rt.as_str()),
            record.actor_id.get(),
            record.actor_role.as_str(),
            record.field_mask.to_hex(),
            encode(&record.changes)?,
            encode(&record.field_changes)?,
            record.note,
            record.undo,
            record.undo_of.map(|id| id.as_bytes().to_vec()),
            &record.created.to_bytes()[..],
            &record.updated.to_bytes()[..],
            &checksum[..],
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StorageError::ConstraintViolation(
                msg.unwrap_or_else(|| format!("edit record {} rejected", record.id)),
            ))
        }
        Err(e) => Err(StorageError::Sqlite(e)),
    }
}

fn query_edits<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<EditRecord>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDIT_COLUMNS} FROM edit_records {filter}"
    ))?;
    let mut rows = stmt.query(params)?;
    let mut edits = Vec::new();
    while let Some(row) = rows.next()? {
        edits.push(read_edit(row)?);
    }
    Ok(edits)
}

fn get_edit(conn: &Connection, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
    Ok(query_edits(
        conn,
        "WHERE edit_id = ?1",
        params![edit_id.as_bytes().as_slice()],
    )?
    .into_iter()
    .next())
}

fn get_edits_after(
    conn: &Connection,
    entity: &EntityKind,
    target_id: TargetId,
    after: Hlc,
) -> Result<Vec<EditRecord>, StorageError> {
    query_edits(
        conn,
        "WHERE entity = ?1 AND target_id = ?2 AND created > ?3 ORDER BY created, edit_id",
        params![entity.as_str(), target_id.get(), &after.to_bytes()[..]],
    )
}

fn get_history(
    conn: &Connection,
    entity: &EntityKind,
    target_id: TargetId,
) -> Result<Vec<EditRecord>, StorageError> {
    query_edits(
        conn,
        "WHERE entity = ?1 AND target_id = ?2 ORDER BY created, edit_id",
        params![entity.as_str(), target_id.get()],
    )
}

fn find_undo_of(conn: &Connection, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
    Ok(query_edits(
        conn,
        "WHERE undo_of = ?1 ORDER BY created, edit_id LIMIT 1",
        params![edit_id.as_bytes().as_slice()],
    )?
    .into_iter()
    .next())
}

fn edit_count(conn: &Connection) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM edit_records", [], |row| row.get(0))?;
    Ok(count as u64)
}

fn latest_created(conn: &Connection) -> Result<Option<Hlc>, StorageError> {
    let bytes: Option<Vec<u8>> =
        conn.query_row("SELECT MAX(created) FROM edit_records", [], |row| row.get(0))?;
    match bytes {
        Some(bytes) => Ok(Some(Hlc::from_bytes(&to_array::<12>(bytes, "created")?))),
        None => Ok(None),
    }
}

fn get_entity(
    conn: &Connection,
    entity: &EntityKind,
    target_id: TargetId,
) -> Result<Option<EntityRecord>, StorageError> {
    let created_at_ms: Option<i64> = conn
        .query_row(
            "SELECT created_at FROM entities WHERE entity = ?1 AND entity_id = ?2",
            params![entity.as_str(), target_id.get()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(created_at_ms.map(|created_at_ms| EntityRecord {
        entity: entity.clone(),
        target_id,
        created_at_ms,
    }))
}

fn get_fields(
    conn: &Connection,
    entity: &EntityKind,
    target_id: TargetId,
) -> Result<BTreeMap<String, FieldValue>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT field_key, value FROM fields WHERE entity = ?1 AND entity_id = ?2",
    )?;
    let rows = stmt.query_map(params![entity.as_str(), target_id.get()], |row| {
        let key: String = row.get(0)?;
        let val_bytes: Vec<u8> = row.get(1)?;
        Ok((key, val_bytes))
    })?;

    let mut result = BTreeMap::new();
    for row in rows {
        let (key, val_bytes) = row?;
        result.insert(key, decode::<FieldValue>(&val_bytes)?);
    }
    Ok(result)
}

fn get_relations(
    conn: &Connection,
    entity: &EntityKind,
    target_id: TargetId,
    relation_type: RelationType,
) -> Result<Vec<RelationRow>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT row_id, item FROM relations WHERE entity = ?1 AND entity_id = ?2 AND relation_type = ?3 ORDER BY row_id",
    )?;
    let rows = stmt.query_map(
        params![entity.as_str(), target_id.get(), relation_type.as_str()],
        |row| {
            let row_id: i64 = row.get(0)?;
            let item_bytes: Vec<u8> = row.get(1)?;
            Ok((row_id, item_bytes))
        },
    )?;

    let mut result = Vec::new();
    for row in rows {
        let (row_id, item_bytes) = row?;
        result.push(RelationRow {
            row_id,
            relation_type,
            item: decode(&item_bytes)?,
        });
    }
    Ok(result)
}

fn get_activities(
    conn: &Connection,
    entity: &EntityKind,
    target_id: TargetId,
) -> Result<Vec<ActivityRecord>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT seq, kind, entity, target_id, actor_id, edit_id, detail FROM activities WHERE entity = ?1 AND target_id = ?2 ORDER BY seq",
    )?;
    let mut rows = stmt.query(params![entity.as_str(), target_id.get()])?;
    let mut activities = Vec::new();
    while let Some(row) = rows.next()? {
        activities.push(read_activity(row)?);
    }
    Ok(activities)
}

impl Storage for SqliteStorage {
    fn append_edit(&mut self, record: &EditRecord) -> Result<(), StorageError> {
        self.run_in_transaction(|uow| uow.append_edit(record))
    }

    fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
        get_edit(&self.conn, edit_id)
    }

    fn get_edits_after(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        after: Hlc,
    ) -> Result<Vec<EditRecord>, StorageError> {
        get_edits_after(&self.conn, entity, target_id, after)
    }

    fn get_history(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<EditRecord>, StorageError> {
        get_history(&self.conn, entity, target_id)
    }

    fn find_undo_of(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
        find_undo_of(&self.conn, edit_id)
    }

    fn edit_count(&self) -> Result<u64, StorageError> {
        edit_count(&self.conn)
    }

    fn latest_created(&self) -> Result<Option<Hlc>, StorageError> {
        latest_created(&self.conn)
    }

    fn get_entity(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Option<EntityRecord>, StorageError> {
        get_entity(&self.conn, entity, target_id)
    }

    fn get_fields(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<BTreeMap<String, FieldValue>, StorageError> {
        get_fields(&self.conn, entity, target_id)
    }

    fn get_relations(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
    ) -> Result<Vec<RelationRow>, StorageError> {
        get_relations(&self.conn, entity, target_id, relation_type)
    }

    fn get_activities(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, StorageError> {
        get_activities(&self.conn, entity, target_id)
    }
}

impl Storage for UnitOfWork<'_> {
    fn append_edit(&mut self, record: &EditRecord) -> Result<(), StorageError> {
        insert_edit(&self.tx, record)
    }

    fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
        get_edit(&self.tx, edit_id)
    }

    fn get_edits_after(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        after: Hlc,
    ) -> Result<Vec<EditRecord>, StorageError> {
        get_edits_after(&self.tx, entity, target_id, after)
    }

    fn get_history(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<EditRecord>, StorageError> {
        get_history(&self.tx, entity, target_id)
    }

    fn find_undo_of(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
        find_undo_of(&self.tx, edit_id)
    }

    fn edit_count(&self) -> Result<u64, StorageError> {
        edit_count(&self.tx)
    }

    fn latest_created(&self) -> Result<Option<Hlc>, StorageError> {
        latest_created(&self.tx)
    }

    fn get_entity(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Option<EntityRecord>, StorageError> {
        get_entity(&self.tx, entity, target_id)
    }

    fn get_fields(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<BTreeMap<String, FieldValue>, StorageError> {
        get_fields(&self.tx, entity, target_id)
    }

    fn get_relations(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
        relation_type: RelationType,
    ) -> Result<Vec<RelationRow>, StorageError> {
        get_relations(&self.tx, entity, target_id, relation_type)
    }

    fn get_activities(
        &self,
        entity: &EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, StorageError> {
        get_activities(&self.tx, entity, target_id)
    }
}
