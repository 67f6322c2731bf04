//! Remote record store interface
//!
//! The remote side is plain record storage: one record type per local
//! kind, fields mapping 1:1 to local columns, deletion as a `deleted`
//! field, and change feeds paged by an opaque continuation token.
//! No conflict logic runs there.

mod http;
mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cursor::ChangeToken;
use crate::models::RecordKind;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// A record as the remote store sees it: loosely typed fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub record_type: String,
    /// Store-level name; stands in for `instance_id` on legacy records
    pub record_name: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// One page of a kind's change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePage {
    pub records: Vec<RemoteRecord>,
    /// Token to resume after this page
    pub next_token: Option<ChangeToken>,
    /// Whether more pages follow
    pub more_coming: bool,
}

/// Addresses one remote record in a save report
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: String,
    pub record_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFailure {
    pub record: RecordRef,
    pub reason: String,
}

/// Per-record outcome of a batch save
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    #[serde(default)]
    pub acknowledged: Vec<RecordRef>,
    #[serde(default)]
    pub failed: Vec<SaveFailure>,
}

/// Errors reported by a remote store
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network trouble or a temporarily unavailable store
    #[error("remote store unavailable: {0}")]
    Transient(String),

    /// The store no longer accepts the change token for this kind
    #[error("change token for {kind} was rejected")]
    InvalidCursor { kind: RecordKind },

    /// The store refused the request outright
    #[error("remote store rejected request: {0}")]
    Rejected(String),

    /// The response could not be understood
    #[error("malformed remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether the same request may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// A shared remote record store
pub trait RemoteStore: Send + Sync + 'static {
    /// Records of `kind` changed after `since` (everything when `None`)
    fn fetch_changes(
        &self,
        kind: RecordKind,
        since: Option<ChangeToken>,
        limit: usize,
    ) -> impl Future<Output = Result<ChangePage, RemoteError>> + Send;

    /// Store records, overwriting by (type, name)
    fn save_records(
        &self,
        records: Vec<RemoteRecord>,
    ) -> impl Future<Output = Result<SaveReport, RemoteError>> + Send;
}
