//! Small key-value table for sync bookkeeping
//!
//! Holds cursor tokens, bootstrap flags and the device id under
//! well-known keys. Helpers take a `&Connection` so they compose with an
//! open transaction.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::StorageResult;

/// Prefix for per-kind change tokens
pub const CURSOR_PREFIX: &str = "cursor:";
/// Prefix for per-kind bootstrap completion flags
pub const BOOTSTRAP_PREFIX: &str = "bootstrap:";
/// Stable per-install identifier
pub const DEVICE_ID_KEY: &str = "device_id";

pub fn kv_get(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM sync_kv WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn kv_set(conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO sync_kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn kv_delete(conn: &Connection, key: &str) -> StorageResult<()> {
    conn.execute("DELETE FROM sync_kv WHERE key = ?", params![key])?;
    Ok(())
}

/// Delete every key starting with `prefix`, returning how many went
pub fn kv_delete_prefix(conn: &Connection, prefix: &str) -> StorageResult<usize> {
    let removed = conn.execute(
        "DELETE FROM sync_kv WHERE substr(key, 1, length(?1)) = ?1",
        params![prefix],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::init_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_set_get_overwrite() {
        let conn = conn();
        assert_eq!(kv_get(&conn, "k").unwrap(), None);

        kv_set(&conn, "k", "one").unwrap();
        kv_set(&conn, "k", "two").unwrap();
        assert_eq!(kv_get(&conn, "k").unwrap().as_deref(), Some("two"));

        kv_delete(&conn, "k").unwrap();
        assert_eq!(kv_get(&conn, "k").unwrap(), None);
    }

    #[test]
    fn test_delete_prefix_leaves_other_keys() {
        let conn = conn();
        kv_set(&conn, "cursor:Block", "t1").unwrap();
        kv_set(&conn, "cursor:Document", "t2").unwrap();
        kv_set(&conn, DEVICE_ID_KEY, "dev").unwrap();

        assert_eq!(kv_delete_prefix(&conn, CURSOR_PREFIX).unwrap(), 2);
        assert_eq!(kv_get(&conn, DEVICE_ID_KEY).unwrap().as_deref(), Some("dev"));
    }
}
