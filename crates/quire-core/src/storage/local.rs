//! Local relational mirror
//!
//! `LocalStore` owns the SQLite connection. Every write goes through a
//! single immediate transaction, so a multi-row change is either fully
//! visible or not at all.
//!
//! ## Dirty flags
//!
//! - `sync_dirty`: the row has local changes the remote has not acknowledged
//! - `index_dirty` (blocks only): the derived tag index is stale for the row
//!
//! The `*_in` functions take a `&Connection` so callers can compose them
//! inside one [`LocalStore::transaction`].

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::kv::{kv_delete_prefix, BOOTSTRAP_PREFIX, CURSOR_PREFIX};
use super::schema::{init_schema, needs_init};
use crate::config::Config;
use crate::models::{
    now_ms, AttachmentFields, BlockFields, ContainerFields, DocumentFields, Fields,
    PlacementFields, Record, RecordKey, RecordKind, SectionFields, Version,
};
use crate::sync::conflict;

/// Who produced a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A mutation made on this device; must be pushed
    Local,
    /// A record applied from the remote store; already stored there
    Remote,
}

/// Which dirty flags to set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyKinds {
    pub sync: bool,
    pub index: bool,
}

impl DirtyKinds {
    pub const SYNC: DirtyKinds = DirtyKinds {
        sync: true,
        index: false,
    };
    pub const INDEX: DirtyKinds = DirtyKinds {
        sync: false,
        index: true,
    };
    pub const BOTH: DirtyKinds = DirtyKinds {
        sync: true,
        index: true,
    };
}

/// Row counts for one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindCount {
    pub kind: RecordKind,
    pub live: i64,
    pub tombstoned: i64,
    pub sync_dirty: i64,
}

/// SQLite-backed local mirror of every record kind
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create the database under the configured data directory
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_path(&config.sqlite_path())
    }

    /// Open or create the database at a specific path
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one immediate transaction
    ///
    /// Commits when `f` returns `Ok`; any error (or panic) drops the
    /// transaction, which rolls it back.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read against the committed state
    pub fn read<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Apply a record if the conflict resolver lets it win
    ///
    /// Returns whether the stored row changed.
    pub fn upsert(&self, record: &Record, origin: WriteOrigin) -> StorageResult<bool> {
        self.transaction(|tx| upsert_in(tx, record, origin))
    }

    /// Record a local mutation, stamping a strictly increasing timestamp
    pub fn write_local(
        &self,
        instance_id: &str,
        fields: Fields,
        deleted: bool,
    ) -> StorageResult<Record> {
        self.transaction(|tx| write_local_in(tx, instance_id, fields, deleted))
    }

    /// Tombstone an existing row as a local mutation
    pub fn delete_local(&self, key: &RecordKey) -> StorageResult<Record> {
        self.transaction(|tx| tombstone_in(tx, key))
    }

    /// Set dirty flags on rows without touching their data
    pub fn mark_dirty<I, S>(
        &self,
        kind: RecordKind,
        ids: I,
        dirty: DirtyKinds,
    ) -> StorageResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transaction(|tx| mark_dirty_in(tx, kind, ids, dirty))
    }

    /// Order key greater than every existing key under `parent_id`
    pub fn next_append_order_key(&self, kind: RecordKind, parent_id: &str) -> StorageResult<f64> {
        self.read(|conn| next_append_order_key_in(conn, kind, parent_id))
    }

    /// Get a row (live or tombstoned)
    pub fn get(&self, key: &RecordKey) -> StorageResult<Option<Record>> {
        self.read(|conn| read_record_in(conn, key))
    }

    /// All live rows of a kind
    pub fn live_records(&self, kind: RecordKind) -> StorageResult<Vec<Record>> {
        self.read(|conn| {
            let sql = select_sql(kind, "WHERE deleted = 0 ORDER BY instance_id");
            query_records(conn, kind, &sql, [])
        })
    }

    /// Live blocks placed in a document, in order
    pub fn blocks_in_document(&self, document_id: &str) -> StorageResult<Vec<Record>> {
        self.read(|conn| {
            let columns = field_columns(RecordKind::Block)
                .iter()
                .map(|c| format!("b.{}", c))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                r#"
                SELECT b.instance_id, b.updated_at_ms, b.deleted, {}
                FROM placements p
                JOIN blocks b ON b.instance_id = p.block_id
                WHERE p.document_id = ? AND p.deleted = 0 AND b.deleted = 0
                ORDER BY p.order_key
                "#,
                columns
            );
            query_records(conn, RecordKind::Block, &sql, params![document_id])
        })
    }

    /// Sync-dirty rows across kinds, parents first, at most `limit`
    pub fn sync_dirty_records(&self, limit: usize) -> StorageResult<Vec<Record>> {
        self.sync_dirty_records_excluding(limit, &HashSet::new())
    }

    /// Same as [`Self::sync_dirty_records`], passing over the keys in `skip`
    pub fn sync_dirty_records_excluding(
        &self,
        limit: usize,
        skip: &HashSet<RecordKey>,
    ) -> StorageResult<Vec<Record>> {
        self.read(|conn| {
            let mut out = Vec::new();
            for kind in RecordKind::ALL {
                let remaining = limit.saturating_sub(out.len());
                if remaining == 0 {
                    break;
                }
                let skipped = skip.iter().filter(|key| key.kind == kind).count();
                let sql = select_sql(kind, "WHERE sync_dirty = 1 ORDER BY updated_at_ms LIMIT ?");
                let rows = query_records(conn, kind, &sql, params![(remaining + skipped) as i64])?;
                out.extend(
                    rows.into_iter()
                        .filter(|record| !skip.contains(&record.key()))
                        .take(remaining),
                );
            }
            Ok(out)
        })
    }

    /// Clear `sync_dirty` if the row still carries the uploaded timestamp
    ///
    /// A row edited again while its upload was in flight stays dirty.
    pub fn clear_sync_dirty(&self, key: &RecordKey, updated_at_ms: i64) -> StorageResult<bool> {
        self.transaction(|tx| {
            let sql = format!(
                "UPDATE {} SET sync_dirty = 0 WHERE instance_id = ? AND updated_at_ms = ?",
                key.kind.table()
            );
            let changed = tx.execute(&sql, params![key.instance_id, updated_at_ms])?;
            Ok(changed > 0)
        })
    }

    /// Per-kind row counts
    pub fn counts(&self) -> StorageResult<Vec<KindCount>> {
        self.read(|conn| {
            RecordKind::ALL
                .into_iter()
                .map(|kind| -> StorageResult<KindCount> {
                    let sql = format!(
                        "SELECT COALESCE(SUM(deleted = 0), 0), COALESCE(SUM(deleted = 1), 0),
                                COALESCE(SUM(sync_dirty = 1), 0)
                         FROM {}",
                        kind.table()
                    );
                    let (live, tombstoned, sync_dirty): (i64, i64, i64) = conn
                        .query_row(&sql, [], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                        })?;
                    Ok(KindCount {
                        kind,
                        live,
                        tombstoned,
                        sync_dirty,
                    })
                })
                .collect()
        })
    }

    /// Number of blocks waiting for an index run
    pub fn index_dirty_count(&self) -> StorageResult<i64> {
        self.read(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM blocks WHERE index_dirty = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Every row of every kind in a stable order
    ///
    /// Dirty flags are device-local and left out, so two converged devices
    /// produce equal snapshots.
    pub fn snapshot(&self) -> StorageResult<Vec<Record>> {
        self.read(|conn| {
            let mut out = Vec::new();
            for kind in RecordKind::ALL {
                let sql = select_sql(kind, "ORDER BY instance_id");
                out.extend(query_records(conn, kind, &sql, [])?);
            }
            Ok(out)
        })
    }

    /// Destructive reset: all rows, the derived index, cursors and bootstrap flags
    ///
    /// The device id survives.
    pub fn reset_all(&self) -> StorageResult<()> {
        self.transaction(|tx| {
            for kind in RecordKind::ALL {
                tx.execute(&format!("DELETE FROM {}", kind.table()), [])?;
            }
            tx.execute("DELETE FROM block_tags", [])?;
            tx.execute("DELETE FROM block_domains", [])?;
            kv_delete_prefix(tx, CURSOR_PREFIX)?;
            kv_delete_prefix(tx, BOOTSTRAP_PREFIX)?;
            Ok::<_, StorageError>(())
        })?;
        debug!("Local store reset");
        Ok(())
    }
}

// ==================== Transaction helpers ====================

/// Resolver-gated write; see [`LocalStore::upsert`]
///
/// When a remote record loses to a strictly newer local row, the remote
/// copy is stale (another device overwrote it with an older version), so
/// the local row is marked sync-dirty to be pushed again.
pub fn upsert_in(conn: &Connection, record: &Record, origin: WriteOrigin) -> StorageResult<bool> {
    let key = record.key();
    let existing = read_version_in(conn, &key)?;
    if !conflict::should_apply(existing, record.version()) {
        debug!(%key, incoming = record.updated_at_ms, "Keeping local row");
        let stale_remote = origin == WriteOrigin::Remote
            && existing.is_some_and(|local| local.updated_at_ms > record.updated_at_ms);
        if stale_remote {
            mark_dirty_in(conn, key.kind, [key.instance_id.as_str()], DirtyKinds::SYNC)?;
        }
        return Ok(false);
    }
    write_row(conn, record, origin)?;
    Ok(true)
}

/// Local mutation with `updated_at_ms = max(now, stored + 1)`
pub fn write_local_in(
    conn: &Connection,
    instance_id: &str,
    fields: Fields,
    deleted: bool,
) -> StorageResult<Record> {
    let key = RecordKey::new(fields.kind(), instance_id);
    let stored = read_version_in(conn, &key)?.map(|v| v.updated_at_ms);
    let record = Record {
        instance_id: instance_id.to_string(),
        updated_at_ms: next_timestamp(stored),
        deleted,
        fields,
    };
    write_row(conn, &record, WriteOrigin::Local)?;
    Ok(record)
}

/// Tombstone an existing row as a local mutation
pub fn tombstone_in(conn: &Connection, key: &RecordKey) -> StorageResult<Record> {
    let existing =
        read_record_in(conn, key)?.ok_or_else(|| StorageError::NotFound(key.clone()))?;
    write_local_in(conn, &key.instance_id, existing.fields, true)
}

pub fn mark_dirty_in<I, S>(
    conn: &Connection,
    kind: RecordKind,
    ids: I,
    dirty: DirtyKinds,
) -> StorageResult<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sets = Vec::new();
    if dirty.sync {
        sets.push("sync_dirty = 1");
    }
    if dirty.index && kind.is_indexed() {
        sets.push("index_dirty = 1");
    }
    if sets.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE instance_id = ?",
        kind.table(),
        sets.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut changed = 0;
    for id in ids {
        changed += stmt.execute(params![id.as_ref()])?;
    }
    Ok(changed)
}

pub fn next_append_order_key_in(
    conn: &Connection,
    kind: RecordKind,
    parent_id: &str,
) -> StorageResult<f64> {
    let parent_column = kind
        .order_parent_column()
        .ok_or(StorageError::NotOrdered(kind))?;
    let sql = format!(
        "SELECT MAX(order_key) FROM {} WHERE {} = ?",
        kind.table(),
        parent_column
    );
    let max: Option<f64> = conn.query_row(&sql, params![parent_id], |row| row.get(0))?;
    Ok(max.map_or(1.0, |m| m + 1.0))
}

pub fn read_version_in(conn: &Connection, key: &RecordKey) -> StorageResult<Option<Version>> {
    let sql = format!(
        "SELECT updated_at_ms, deleted FROM {} WHERE instance_id = ?",
        key.kind.table()
    );
    let version = conn
        .query_row(&sql, params![key.instance_id], |row| {
            Ok(Version {
                updated_at_ms: row.get(0)?,
                deleted: row.get(1)?,
            })
        })
        .optional()?;
    Ok(version)
}

pub fn read_record_in(conn: &Connection, key: &RecordKey) -> StorageResult<Option<Record>> {
    let sql = select_sql(key.kind, "WHERE instance_id = ?");
    let mut records = query_records(conn, key.kind, &sql, params![key.instance_id])?;
    Ok(records.pop())
}

/// Every live placement of `block_id`, newest first
///
/// Normally one; concurrent moves on different devices can leave several.
pub fn live_placements_in(conn: &Connection, block_id: &str) -> StorageResult<Vec<Record>> {
    let sql = select_sql(
        RecordKind::Placement,
        "WHERE block_id = ? AND deleted = 0 ORDER BY updated_at_ms DESC, instance_id",
    );
    query_records(conn, RecordKind::Placement, &sql, params![block_id])
}

fn next_timestamp(stored: Option<i64>) -> i64 {
    let now = now_ms();
    match stored {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

fn write_row(conn: &Connection, record: &Record, origin: WriteOrigin) -> StorageResult<()> {
    let kind = record.kind();
    let mut columns = vec!["instance_id"];
    columns.extend_from_slice(field_columns(kind));
    columns.extend_from_slice(&["updated_at_ms", "deleted", "sync_dirty"]);

    let mut values = vec![Value::Text(record.instance_id.clone())];
    values.extend(field_values(&record.fields));
    values.push(Value::Integer(record.updated_at_ms));
    values.push(Value::Integer(record.deleted as i64));
    values.push(Value::Integer((origin == WriteOrigin::Local) as i64));

    if kind.is_indexed() {
        columns.push("index_dirty");
        values.push(Value::Integer(1));
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        kind.table(),
        columns.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

// ==================== Row mapping ====================

fn field_columns(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Container => &["title", "order_key"],
        RecordKind::Section => &["container_id", "title", "order_key"],
        RecordKind::Document => &["container_id", "section_id", "title", "domain", "order_key"],
        RecordKind::Block => &["body", "tags_raw"],
        RecordKind::Placement => &["block_id", "document_id", "order_key"],
        RecordKind::Attachment => &["block_id", "file_name", "media_type", "byte_len"],
    }
}

fn field_values(fields: &Fields) -> Vec<Value> {
    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }
    fn opt_text(s: &Option<String>) -> Value {
        s.as_deref().map_or(Value::Null, text)
    }

    match fields {
        Fields::Container(f) => vec![text(&f.title), Value::Real(f.order_key)],
        Fields::Section(f) => vec![
            text(&f.container_id),
            text(&f.title),
            Value::Real(f.order_key),
        ],
        Fields::Document(f) => vec![
            text(&f.container_id),
            opt_text(&f.section_id),
            text(&f.title),
            opt_text(&f.domain),
            Value::Real(f.order_key),
        ],
        Fields::Block(f) => vec![text(&f.body), text(&f.tags_raw)],
        Fields::Placement(f) => vec![
            text(&f.block_id),
            text(&f.document_id),
            Value::Real(f.order_key),
        ],
        Fields::Attachment(f) => vec![
            text(&f.block_id),
            text(&f.file_name),
            text(&f.media_type),
            f.byte_len.map_or(Value::Null, Value::Integer),
        ],
    }
}

fn select_sql(kind: RecordKind, tail: &str) -> String {
    format!(
        "SELECT instance_id, updated_at_ms, deleted, {} FROM {} {}",
        field_columns(kind).join(", "),
        kind.table(),
        tail
    )
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    kind: RecordKind,
    sql: &str,
    params: P,
) -> StorageResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params, |row| record_from_row(kind, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn record_from_row(kind: RecordKind, row: &Row<'_>) -> rusqlite::Result<Record> {
    let fields = match kind {
        RecordKind::Container => Fields::Container(ContainerFields {
            title: row.get(3)?,
            order_key: row.get(4)?,
        }),
        RecordKind::Section => Fields::Section(SectionFields {
            container_id: row.get(3)?,
            title: row.get(4)?,
            order_key: row.get(5)?,
        }),
        RecordKind::Document => Fields::Document(DocumentFields {
            container_id: row.get(3)?,
            section_id: row.get(4)?,
            title: row.get(5)?,
            domain: row.get(6)?,
            order_key: row.get(7)?,
        }),
        RecordKind::Block => Fields::Block(BlockFields {
            body: row.get(3)?,
            tags_raw: row.get(4)?,
        }),
        RecordKind::Placement => Fields::Placement(PlacementFields {
            block_id: row.get(3)?,
            document_id: row.get(4)?,
            order_key: row.get(5)?,
        }),
        RecordKind::Attachment => Fields::Attachment(AttachmentFields {
            block_id: row.get(3)?,
            file_name: row.get(4)?,
            media_type: row.get(5)?,
            byte_len: row.get(6)?,
        }),
    };

    Ok(Record {
        instance_id: row.get(0)?,
        updated_at_ms: row.get(1)?,
        deleted: row.get(2)?,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{kv_get, kv_set};
    use tempfile::TempDir;

    fn block(id: &str, body: &str, ts: i64, deleted: bool) -> Record {
        Record {
            instance_id: id.to_string(),
            updated_at_ms: ts,
            deleted,
            fields: Fields::Block(BlockFields {
                body: body.to_string(),
                tags_raw: "[]".to_string(),
            }),
        }
    }

    fn placement(id: &str, block_id: &str, document_id: &str, order_key: f64) -> Record {
        Record {
            instance_id: id.to_string(),
            updated_at_ms: 10,
            deleted: false,
            fields: Fields::Placement(PlacementFields {
                block_id: block_id.to_string(),
                document_id: document_id.to_string(),
                order_key,
            }),
        }
    }

    fn body_of(store: &LocalStore, id: &str) -> String {
        match store
            .get(&RecordKey::new(RecordKind::Block, id))
            .unwrap()
            .unwrap()
            .fields
        {
            Fields::Block(b) => b.body,
            other => panic!("unexpected fields {:?}", other),
        }
    }

    #[test]
    fn test_upsert_inserts_then_requires_newer() {
        let store = LocalStore::open_in_memory().unwrap();

        assert!(store.upsert(&block("b1", "v1", 100, false), WriteOrigin::Remote).unwrap());
        assert!(!store.upsert(&block("b1", "older", 50, false), WriteOrigin::Remote).unwrap());
        assert!(!store.upsert(&block("b1", "tie", 100, false), WriteOrigin::Remote).unwrap());
        assert_eq!(body_of(&store, "b1"), "v1");

        assert!(store.upsert(&block("b1", "v2", 101, false), WriteOrigin::Remote).unwrap());
        assert_eq!(body_of(&store, "b1"), "v2");
    }

    #[test]
    fn test_same_record_twice_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = block("b1", "v1", 100, false);

        store.upsert(&record, WriteOrigin::Remote).unwrap();
        let once = store.snapshot().unwrap();
        assert!(!store.upsert(&record, WriteOrigin::Remote).unwrap());
        assert_eq!(store.snapshot().unwrap(), once);
    }

    #[test]
    fn test_origin_controls_sync_dirty() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("remote", "r", 1, false), WriteOrigin::Remote).unwrap();
        store.upsert(&block("local", "l", 1, false), WriteOrigin::Local).unwrap();

        let dirty = store.sync_dirty_records(10).unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].instance_id, "local");

        // Both paths leave blocks index-dirty
        assert_eq!(store.index_dirty_count().unwrap(), 2);
    }

    #[test]
    fn test_remote_win_clears_pending_local_change() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "local", 100, false), WriteOrigin::Local).unwrap();
        store.upsert(&block("b1", "remote", 200, false), WriteOrigin::Remote).unwrap();

        assert!(store.sync_dirty_records(10).unwrap().is_empty());
        assert_eq!(body_of(&store, "b1"), "remote");
    }

    #[test]
    fn test_stale_remote_copy_requeues_local_row() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "newer", 200, false), WriteOrigin::Remote).unwrap();
        assert!(store.sync_dirty_records(10).unwrap().is_empty());

        // Tie: nothing to repair
        store.upsert(&block("b1", "same", 200, false), WriteOrigin::Remote).unwrap();
        assert!(store.sync_dirty_records(10).unwrap().is_empty());

        assert!(!store.upsert(&block("b1", "older", 100, false), WriteOrigin::Remote).unwrap());
        let dirty = store.sync_dirty_records(10).unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].updated_at_ms, 200);
        assert_eq!(body_of(&store, "b1"), "newer");
    }

    #[test]
    fn test_write_local_timestamps_strictly_increase() {
        let store = LocalStore::open_in_memory().unwrap();
        let future = now_ms() + 60_000;
        store.upsert(&block("b1", "ahead", future, false), WriteOrigin::Remote).unwrap();

        let fields = Fields::Block(BlockFields {
            body: "edit".into(),
            tags_raw: "[]".into(),
        });
        let first = store.write_local("b1", fields.clone(), false).unwrap();
        let second = store.write_local("b1", fields, false).unwrap();

        assert_eq!(first.updated_at_ms, future + 1);
        assert_eq!(second.updated_at_ms, future + 2);
        assert_eq!(store.sync_dirty_records(10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_local_keeps_tombstone() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "x", 5, false), WriteOrigin::Remote).unwrap();

        let key = RecordKey::new(RecordKind::Block, "b1");
        let tomb = store.delete_local(&key).unwrap();
        assert!(tomb.deleted);
        assert!(tomb.updated_at_ms > 5);

        let stored = store.get(&key).unwrap().unwrap();
        assert!(stored.deleted);
        assert!(store.live_records(RecordKind::Block).unwrap().is_empty());

        let missing = store.delete_local(&RecordKey::new(RecordKind::Block, "nope"));
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_mark_dirty_is_independent_per_flag() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "x", 5, false), WriteOrigin::Remote).unwrap();
        store
            .transaction(|tx| {
                tx.execute("UPDATE blocks SET index_dirty = 0", [])?;
                Ok::<_, StorageError>(())
            })
            .unwrap();

        store.mark_dirty(RecordKind::Block, ["b1"], DirtyKinds::SYNC).unwrap();
        assert_eq!(store.sync_dirty_records(10).unwrap().len(), 1);
        assert_eq!(store.index_dirty_count().unwrap(), 0);

        store.mark_dirty(RecordKind::Block, ["b1"], DirtyKinds::INDEX).unwrap();
        assert_eq!(store.index_dirty_count().unwrap(), 1);

        // Index flag is meaningless for unindexed kinds
        assert_eq!(
            store
                .mark_dirty(RecordKind::Container, ["b1"], DirtyKinds::INDEX)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_next_append_order_key() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(
            store.next_append_order_key(RecordKind::Placement, "doc").unwrap(),
            1.0
        );

        store.upsert(&placement("p1", "b1", "doc", 1.0), WriteOrigin::Remote).unwrap();
        store.upsert(&placement("p2", "b2", "doc", 2.5), WriteOrigin::Remote).unwrap();
        store.upsert(&placement("p3", "b3", "other", 9.0), WriteOrigin::Remote).unwrap();

        let next = store.next_append_order_key(RecordKind::Placement, "doc").unwrap();
        assert!(next > 2.5);
        assert!(matches!(
            store.next_append_order_key(RecordKind::Block, "doc"),
            Err(StorageError::NotOrdered(RecordKind::Block))
        ));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = LocalStore::open_in_memory().unwrap();

        let result: StorageResult<()> = store.transaction(|tx| {
            upsert_in(tx, &block("b1", "x", 1, false), WriteOrigin::Local)?;
            upsert_in(tx, &block("b2", "y", 1, false), WriteOrigin::Local)?;
            Err(StorageError::NotFound(RecordKey::new(RecordKind::Block, "boom")))
        });

        assert!(result.is_err());
        assert!(store.snapshot().unwrap().is_empty());
        assert!(store.sync_dirty_records(10).unwrap().is_empty());
    }

    #[test]
    fn test_clear_sync_dirty_requires_matching_timestamp() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "x", 10, false), WriteOrigin::Local).unwrap();
        let key = RecordKey::new(RecordKind::Block, "b1");

        assert!(!store.clear_sync_dirty(&key, 9).unwrap());
        assert_eq!(store.sync_dirty_records(10).unwrap().len(), 1);

        assert!(store.clear_sync_dirty(&key, 10).unwrap());
        assert!(store.sync_dirty_records(10).unwrap().is_empty());
    }

    #[test]
    fn test_sync_dirty_records_respects_limit_and_parent_order() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&placement("p1", "b1", "d1", 1.0), WriteOrigin::Local).unwrap();
        store.upsert(&block("b1", "x", 1, false), WriteOrigin::Local).unwrap();
        store.upsert(&block("b2", "y", 2, false), WriteOrigin::Local).unwrap();

        let all = store.sync_dirty_records(10).unwrap();
        let kinds: Vec<_> = all.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![RecordKind::Block, RecordKind::Block, RecordKind::Placement]
        );
        assert_eq!(store.sync_dirty_records(2).unwrap().len(), 2);
    }

    #[test]
    fn test_blocks_in_document_follows_live_placements() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "first", 1, false), WriteOrigin::Remote).unwrap();
        store.upsert(&block("b2", "second", 1, false), WriteOrigin::Remote).unwrap();
        store.upsert(&placement("p2", "b2", "doc", 2.0), WriteOrigin::Remote).unwrap();
        store.upsert(&placement("p1", "b1", "doc", 1.0), WriteOrigin::Remote).unwrap();

        let ids: Vec<_> = store
            .blocks_in_document("doc")
            .unwrap()
            .into_iter()
            .map(|r| r.instance_id)
            .collect();
        assert_eq!(ids, vec!["b1", "b2"]);
    }

    #[test]
    fn test_counts() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "x", 1, false), WriteOrigin::Remote).unwrap();
        store.upsert(&block("b2", "y", 1, true), WriteOrigin::Local).unwrap();

        let counts = store.counts().unwrap();
        let blocks = counts.iter().find(|c| c.kind == RecordKind::Block).unwrap();
        assert_eq!(blocks.live, 1);
        assert_eq!(blocks.tombstoned, 1);
        assert_eq!(blocks.sync_dirty, 1);
    }

    #[test]
    fn test_reset_all_clears_rows_and_cursors() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&block("b1", "x", 1, false), WriteOrigin::Remote).unwrap();
        store
            .transaction(|tx| {
                kv_set(tx, "cursor:Block", "t")?;
                kv_set(tx, "device_id", "dev")?;
                Ok::<_, StorageError>(())
            })
            .unwrap();

        store.reset_all().unwrap();

        assert!(store.snapshot().unwrap().is_empty());
        let (cursor, device) = store
            .read(|conn| {
                Ok((
                    kv_get(conn, "cursor:Block")?,
                    kv_get(conn, "device_id")?,
                ))
            })
            .unwrap();
        assert_eq!(cursor, None);
        assert_eq!(device.as_deref(), Some("dev"));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("quire.db");

        {
            let store = LocalStore::open_path(&path).unwrap();
            store.upsert(&block("b1", "kept", 7, false), WriteOrigin::Local).unwrap();
        }

        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(body_of(&store, "b1"), "kept");
        assert_eq!(store.sync_dirty_records(10).unwrap().len(), 1);
    }
}
