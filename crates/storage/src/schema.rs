use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS entities (
    entity_id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL,
    count INTEGER CHECK (count IS NULL OR count >= 0),
    min_threshold INTEGER CHECK (min_threshold IS NULL OR min_threshold >= 0),
    updated_at BLOB CHECK (updated_at IS NULL OR length(updated_at) = 12)
);
CREATE INDEX IF NOT EXISTS idx_entities_category ON entities (category);

CREATE TABLE IF NOT EXISTS mutation_log (
    rowid INTEGER PRIMARY KEY,
    mutation_id BLOB NOT NULL UNIQUE CHECK (length(mutation_id) = 16),
    entity_id TEXT NOT NULL REFERENCES entities (entity_id),
    op_type TEXT NOT NULL,
    payload BLOB NOT NULL,
    result_category TEXT,
    previous_value INTEGER,
    resulting_value INTEGER,
    applied_at BLOB NOT NULL CHECK (length(applied_at) = 12)
);
CREATE INDEX IF NOT EXISTS idx_mutation_log_entity ON mutation_log (entity_id, applied_at);

CREATE TABLE IF NOT EXISTS audit_log (
    audit_id BLOB PRIMARY KEY CHECK (length(audit_id) = 16),
    entity_id TEXT NOT NULL REFERENCES entities (entity_id),
    change_amount INTEGER NOT NULL,
    resulting_value INTEGER NOT NULL CHECK (resulting_value >= 0),
    action TEXT NOT NULL,
    performed_by TEXT NOT NULL,
    hlc BLOB NOT NULL CHECK (length(hlc) = 12)
);
CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log (entity_id, hlc);
";
