//! In-process remote store
//!
//! Plain record storage with a global change sequence. Cloning shares the
//! underlying state, so several local stores can sync against one instance
//! the way devices share one remote database. Failure injection hooks let
//! callers exercise retry and resync paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChangePage, RecordRef, RemoteError, RemoteRecord, RemoteStore, SaveFailure, SaveReport};
use crate::models::RecordKind;
use crate::sync::cursor::ChangeToken;

#[derive(Default)]
struct MemoryState {
    seq: u64,
    /// Bumped by `expire_tokens`; tokens from older epochs are rejected
    epoch: u64,
    /// record_type -> record_name -> (change seq, record)
    records: HashMap<String, BTreeMap<String, (u64, RemoteRecord)>>,
    failing_fetches: u32,
    failing_saves: u32,
    rejected_names: HashSet<String>,
    save_batches: Vec<usize>,
}

/// Shared in-memory remote store
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record directly, as another device's push would
    pub fn put(&self, record: RemoteRecord) {
        let mut state = self.state.lock();
        state.store(record);
    }

    pub fn get(&self, kind: RecordKind, name: &str) -> Option<RemoteRecord> {
        let state = self.state.lock();
        state
            .records
            .get(kind.record_type())
            .and_then(|by_name| by_name.get(name))
            .map(|(_, record)| record.clone())
    }

    /// Number of records stored for a kind, tombstones included
    pub fn len(&self, kind: RecordKind) -> usize {
        let state = self.state.lock();
        state
            .records
            .get(kind.record_type())
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.records.values().all(BTreeMap::is_empty)
    }

    /// Fail the next `n` fetches with a transient error
    pub fn fail_next_fetches(&self, n: u32) {
        self.state.lock().failing_fetches = n;
    }

    /// Fail the next `n` saves with a transient error
    pub fn fail_next_saves(&self, n: u32) {
        self.state.lock().failing_saves = n;
    }

    /// Refuse every future save of this record name
    pub fn reject_record(&self, name: &str) {
        self.state.lock().rejected_names.insert(name.to_string());
    }

    /// Invalidate every token issued so far
    pub fn expire_tokens(&self) {
        self.state.lock().epoch += 1;
    }

    /// Sizes of the batches passed to successful saves
    pub fn save_batches(&self) -> Vec<usize> {
        self.state.lock().save_batches.clone()
    }
}

impl MemoryState {
    fn store(&mut self, record: RemoteRecord) {
        self.seq += 1;
        let seq = self.seq;
        self.records
            .entry(record.record_type.clone())
            .or_default()
            .insert(record.record_name.clone(), (seq, record));
    }

    fn token(&self, seq: u64) -> ChangeToken {
        ChangeToken(format!("{}:{}", self.epoch, seq))
    }

    fn parse_token(&self, kind: RecordKind, token: &ChangeToken) -> Result<u64, RemoteError> {
        let invalid = || RemoteError::InvalidCursor { kind };
        let (epoch, seq) = token.as_str().split_once(':').ok_or_else(invalid)?;
        let epoch: u64 = epoch.parse().map_err(|_| invalid())?;
        if epoch != self.epoch {
            return Err(invalid());
        }
        seq.parse().map_err(|_| invalid())
    }
}

impl RemoteStore for MemoryRemote {
    async fn fetch_changes(
        &self,
        kind: RecordKind,
        since: Option<ChangeToken>,
        limit: usize,
    ) -> Result<ChangePage, RemoteError> {
        let mut state = self.state.lock();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(RemoteError::Transient("injected fetch failure".into()));
        }

        let after = match &since {
            Some(token) => state.parse_token(kind, token)?,
            None => 0,
        };

        let mut changed: Vec<(u64, RemoteRecord)> = state
            .records
            .get(kind.record_type())
            .map(|by_name| {
                by_name
                    .values()
                    .filter(|(seq, _)| *seq > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        changed.sort_by_key(|(seq, _)| *seq);

        let limit = limit.max(1);
        let more_coming = changed.len() > limit;
        changed.truncate(limit);

        let last = changed.last().map_or(after, |(seq, _)| *seq);
        Ok(ChangePage {
            records: changed.into_iter().map(|(_, record)| record).collect(),
            next_token: Some(state.token(last)),
            more_coming,
        })
    }

    async fn save_records(&self, records: Vec<RemoteRecord>) -> Result<SaveReport, RemoteError> {
        let mut state = self.state.lock();
        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(RemoteError::Transient("injected save failure".into()));
        }

        state.save_batches.push(records.len());
        let mut report = SaveReport::default();
        for record in records {
            let reference = RecordRef {
                record_type: record.record_type.clone(),
                record_name: record.record_name.clone(),
            };
            if state.rejected_names.contains(&record.record_name) {
                report.failed.push(SaveFailure {
                    record: reference,
                    reason: "rejected by store".into(),
                });
                continue;
            }
            state.store(record);
            report.acknowledged.push(reference);
        }
        Ok(report)
    }
}
