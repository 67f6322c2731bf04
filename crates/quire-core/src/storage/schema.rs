//! SQLite schema for the local mirror
//!
//! One table per record kind, each with the common sync columns
//! (`instance_id`, `updated_at_ms`, `deleted`, `sync_dirty`), the derived
//! tag index tables, and the `sync_kv` table holding cursors, bootstrap
//! flags and the device id.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Cursors, bootstrap flags, device id
        CREATE TABLE IF NOT EXISTS sync_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS containers (
            instance_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            order_key REAL NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_dirty INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sections (
            instance_id TEXT PRIMARY KEY,
            container_id TEXT NOT NULL,
            title TEXT NOT NULL,
            order_key REAL NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_dirty INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS documents (
            instance_id TEXT PRIMARY KEY,
            container_id TEXT NOT NULL,
            section_id TEXT,
            title TEXT NOT NULL,
            domain TEXT,
            order_key REAL NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_dirty INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS blocks (
            instance_id TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            tags_raw TEXT NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_dirty INTEGER NOT NULL DEFAULT 0,
            index_dirty INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS placements (
            instance_id TEXT PRIMARY KEY,
            block_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            order_key REAL NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_dirty INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS attachments (
            instance_id TEXT PRIMARY KEY,
            block_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            media_type TEXT NOT NULL,
            byte_len INTEGER,
            updated_at_ms INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_dirty INTEGER NOT NULL DEFAULT 0
        );

        -- Derived tag index (rebuildable from blocks.tags_raw)
        CREATE TABLE IF NOT EXISTS block_tags (
            block_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (block_id, tag)
        );

        CREATE TABLE IF NOT EXISTS block_domains (
            block_id TEXT PRIMARY KEY,
            domain TEXT,
            mixed INTEGER NOT NULL DEFAULT 0
        );

        -- Dirty scans
        CREATE INDEX IF NOT EXISTS idx_containers_sync_dirty ON containers(sync_dirty);
        CREATE INDEX IF NOT EXISTS idx_sections_sync_dirty ON sections(sync_dirty);
        CREATE INDEX IF NOT EXISTS idx_documents_sync_dirty ON documents(sync_dirty);
        CREATE INDEX IF NOT EXISTS idx_blocks_sync_dirty ON blocks(sync_dirty);
        CREATE INDEX IF NOT EXISTS idx_blocks_index_dirty ON blocks(index_dirty);
        CREATE INDEX IF NOT EXISTS idx_placements_sync_dirty ON placements(sync_dirty);
        CREATE INDEX IF NOT EXISTS idx_attachments_sync_dirty ON attachments(sync_dirty);

        -- Parent lookups and order keys
        CREATE INDEX IF NOT EXISTS idx_sections_container ON sections(container_id, order_key);
        CREATE INDEX IF NOT EXISTS idx_documents_container ON documents(container_id, order_key);
        CREATE INDEX IF NOT EXISTS idx_placements_document ON placements(document_id, order_key);
        CREATE INDEX IF NOT EXISTS idx_placements_block ON placements(block_id);
        CREATE INDEX IF NOT EXISTS idx_attachments_block ON attachments(block_id);

        -- Fast tag lookups
        CREATE INDEX IF NOT EXISTS idx_block_tags_tag ON block_tags(tag);
        CREATE INDEX IF NOT EXISTS idx_block_domains_domain ON block_domains(domain);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordKind;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_init_schema_creates_every_kind_table() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        for kind in RecordKind::ALL {
            assert!(tables.contains(&kind.table().to_string()), "{}", kind);
        }
        assert!(tables.contains(&"sync_kv".to_string()));
        assert!(tables.contains(&"block_tags".to_string()));
        assert!(tables.contains(&"block_domains".to_string()));
    }

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_init_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_dirty_indexes_exist() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"idx_blocks_index_dirty".to_string()));
        assert!(indexes.contains(&"idx_placements_document".to_string()));
        assert!(indexes.contains(&"idx_block_tags_tag".to_string()));
    }
}
