use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection, busy_timeout_ms: u32) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
    ",
    )?;
    conn.busy_timeout(std::time::Duration::from_millis(u64::from(busy_timeout_ms)))?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS edit_records (
    rowid INTEGER PRIMARY KEY,
    edit_id BLOB NOT NULL UNIQUE CHECK (length(edit_id) = 16),
    entity TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    relation_type TEXT,
    actor_id INTEGER NOT NULL,
    actor_role TEXT NOT NULL,
    field_mask TEXT NOT NULL,
    changes BLOB NOT NULL,
    field_changes BLOB NOT NULL,
    note TEXT,
    is_undo INTEGER NOT NULL CHECK (is_undo IN (0, 1)),
    undo_of BLOB CHECK (undo_of IS NULL OR length(undo_of) = 16),
    created BLOB NOT NULL CHECK (length(created) = 12),
    updated BLOB NOT NULL CHECK (length(updated) = 12),
    checksum BLOB NOT NULL CHECK (length(checksum) = 32),
    CHECK ((is_undo = 1) = (undo_of IS NOT NULL))
);
CREATE INDEX IF NOT EXISTS idx_edit_records_target ON edit_records (entity, target_id, created);
CREATE INDEX IF NOT EXISTS idx_edit_records_undo_of ON edit_records (undo_of) WHERE undo_of IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_edit_records_created ON edit_records (created);

CREATE TRIGGER IF NOT EXISTS edit_records_no_update
BEFORE UPDATE ON edit_records
BEGIN
    SELECT RAISE(ABORT, 'edit records are immutable');
END;

CREATE TRIGGER IF NOT EXISTS edit_records_no_delete
BEFORE DELETE ON edit_records
BEGIN
    SELECT RAISE(ABORT, 'edit records are immutable');
END;

CREATE TABLE IF NOT EXISTS entities (
    entity TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    PRIMARY KEY (entity, entity_id)
);

CREATE TABLE IF NOT EXISTS fields (
    entity TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (entity, entity_id, field_key),
    FOREIGN KEY (entity, entity_id) REFERENCES entities (entity, entity_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS relations (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    relation_type TEXT NOT NULL,
    item_id INTEGER,
    item BLOB NOT NULL,
    value_tuple BLOB NOT NULL,
    FOREIGN KEY (entity, entity_id) REFERENCES entities (entity, entity_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_relations_owner ON relations (entity, entity_id, relation_type);

CREATE TABLE IF NOT EXISTS activities (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    entity TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    actor_id INTEGER NOT NULL,
    edit_id BLOB NOT NULL CHECK (length(edit_id) = 16),
    detail TEXT,
    recorded_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_activities_target ON activities (entity, target_id, seq);
";
