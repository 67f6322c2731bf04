//! Per-kind change tokens and bootstrap flags
//!
//! Stored in the `sync_kv` table of the local store. The pull engine only
//! calls [`CursorStore::set_cursor`] after the page the token covers has
//! committed, so a crash in between re-fetches that page instead of
//! skipping it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::RecordKind;
use crate::storage::kv::{
    kv_delete, kv_delete_prefix, kv_get, kv_set, BOOTSTRAP_PREFIX, CURSOR_PREFIX,
};
use crate::storage::{LocalStore, StorageError, StorageResult};

/// Opaque continuation token issued by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(pub String);

impl ChangeToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChangeToken {
    fn from(s: &str) -> Self {
        ChangeToken(s.to_string())
    }
}

/// Cursor persistence keyed by record kind
#[derive(Clone)]
pub struct CursorStore {
    store: Arc<LocalStore>,
}

impl CursorStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn get_cursor(&self, kind: RecordKind) -> StorageResult<Option<ChangeToken>> {
        self.store
            .read(|conn| Ok(kv_get(conn, &cursor_key(kind))?.map(ChangeToken)))
    }

    pub fn set_cursor(&self, kind: RecordKind, token: &ChangeToken) -> StorageResult<()> {
        self.store
            .transaction(|tx| kv_set(tx, &cursor_key(kind), token.as_str()))
    }

    pub fn is_bootstrapped(&self, kind: RecordKind) -> StorageResult<bool> {
        self.store
            .read(|conn| Ok(kv_get(conn, &bootstrap_key(kind))?.as_deref() == Some("1")))
    }

    pub fn mark_bootstrapped(&self, kind: RecordKind) -> StorageResult<()> {
        self.store
            .transaction(|tx| kv_set(tx, &bootstrap_key(kind), "1"))
    }

    /// Forget one kind's position; its next pull starts from the beginning
    pub fn reset(&self, kind: RecordKind) -> StorageResult<()> {
        self.store.transaction(|tx| {
            kv_delete(tx, &cursor_key(kind))?;
            kv_delete(tx, &bootstrap_key(kind))?;
            Ok::<_, StorageError>(())
        })
    }

    /// Forget every cursor and bootstrap flag
    pub fn reset_all(&self) -> StorageResult<()> {
        self.store.transaction(|tx| {
            kv_delete_prefix(tx, CURSOR_PREFIX)?;
            kv_delete_prefix(tx, BOOTSTRAP_PREFIX)?;
            Ok::<_, StorageError>(())
        })
    }

    /// True once every kind has finished its first full pull
    pub fn all_bootstrapped(&self) -> StorageResult<bool> {
        for kind in RecordKind::ALL {
            if !self.is_bootstrapped(kind)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn cursor_key(kind: RecordKind) -> String {
    format!("{}{}", CURSOR_PREFIX, kind.record_type())
}

fn bootstrap_key(kind: RecordKind) -> String {
    format!("{}{}", BOOTSTRAP_PREFIX, kind.record_type())
}
