//! Debounced push of local changes
//!
//! `schedule_push` collapses bursts of local mutations into one upload:
//! each call bumps a generation and replaces the pending timer, and a timer
//! only fires if its generation is still current. At most one upload runs
//! at a time; a request arriving mid-upload sets a rerun flag and the
//! upload loop goes around once more when it finishes.
//!
//! Each pass sends a row at most once, so rows the remote refuses cannot
//! starve the dirty rows queued behind them. A failed upload reschedules
//! itself with bounded exponential backoff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::error::SyncResult;
use super::remote::{RemoteRecord, RemoteStore};
use super::signals::{SyncEvent, SyncSignals};
use crate::models::RecordKey;
use crate::storage::LocalStore;

/// Outcome of an upload pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub batches: usize,
    /// Rows acknowledged and cleared
    pub uploaded: usize,
    /// Rows the remote refused; they stay dirty
    pub failed: usize,
    /// Acknowledged rows edited again during the upload; they stay dirty
    pub superseded: usize,
}

#[derive(Default)]
struct SchedulerState {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    in_flight: bool,
    rerun: bool,
}

struct Inner<R> {
    store: Arc<LocalStore>,
    remote: Arc<R>,
    signals: SyncSignals,
    batch_size: usize,
    state: Mutex<SchedulerState>,
    backoff: Mutex<Backoff>,
    /// Serializes upload passes, including direct `push_now` calls
    upload_gate: tokio::sync::Mutex<()>,
}

pub struct PushScheduler<R: RemoteStore> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteStore> Clone for PushScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteStore> PushScheduler<R> {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<R>,
        signals: SyncSignals,
        batch_size: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                signals,
                batch_size: batch_size.max(1),
                state: Mutex::new(SchedulerState::default()),
                backoff: Mutex::new(backoff),
                upload_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Request a push after `debounce`
    ///
    /// Calls inside the window collapse into one upload. A zero debounce
    /// cancels any pending timer and starts the upload right away. Must be
    /// called from within a tokio runtime.
    pub fn schedule_push(&self, debounce: Duration) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        let generation = state.generation;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let this = self.clone();
        if debounce.is_zero() {
            drop(state);
            tokio::spawn(async move { this.upload_loop().await });
            return;
        }

        // Stored while the lock is held, so the timer cannot claim itself first
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if this.claim_timer(generation) {
                this.upload_loop().await;
            }
        }));
    }

    /// Whether a debounced push is waiting to fire
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.state.lock().in_flight
    }

    /// Upload everything dirty now, waiting for any running upload first
    pub async fn push_now(&self) -> SyncResult<PushReport> {
        let _gate = self.inner.upload_gate.lock().await;
        self.upload_dirty().await
    }

    /// Detach the timer if it is still the current one
    ///
    /// Once detached, a later `schedule_push` can no longer abort it, so an
    /// upload is never cancelled midway.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return false;
        }
        state.timer = None;
        true
    }

    async fn upload_loop(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.in_flight {
                state.rerun = true;
                return;
            }
            state.in_flight = true;
        }

        loop {
            let result = {
                let _gate = self.inner.upload_gate.lock().await;
                self.upload_dirty().await
            };

            match result {
                Ok(report) => {
                    self.inner.backoff.lock().reset();
                    if report.batches > 0 {
                        info!(
                            uploaded = report.uploaded,
                            failed = report.failed,
                            "Push completed"
                        );
                    }
                    self.inner.signals.emit(SyncEvent::PushCompleted {
                        uploaded: report.uploaded,
                        failed: report.failed,
                    });
                }
                Err(e) => self.retry_later(&e.to_string()),
            }

            let mut state = self.inner.state.lock();
            if state.rerun {
                state.rerun = false;
                continue;
            }
            state.in_flight = false;
            break;
        }
    }

    fn retry_later(&self, error: &str) {
        let delay = {
            let mut backoff = self.inner.backoff.lock();
            let delay = backoff.next_delay();
            if delay.is_none() {
                backoff.reset();
            }
            delay
        };

        match delay {
            Some(delay) => {
                warn!(error, retry_in_ms = delay.as_millis() as u64, "Push failed, retrying");
                self.schedule_push(delay);
            }
            None => warn!(error, "Push failed, giving up until the next change"),
        }
    }

    /// Upload dirty rows batch by batch until every one has been sent once
    async fn upload_dirty(&self) -> SyncResult<PushReport> {
        let inner = &self.inner;
        let mut report = PushReport::default();
        // Refused and superseded rows stay dirty; the next pass retries them
        let mut sent: HashSet<RecordKey> = HashSet::new();

        loop {
            let batch = inner
                .store
                .sync_dirty_records_excluding(inner.batch_size, &sent)?;
            if batch.is_empty() {
                break;
            }
            let full = batch.len() == inner.batch_size;
            sent.extend(batch.iter().map(|record| record.key()));

            let uploaded_versions: HashMap<RecordKey, i64> = batch
                .iter()
                .map(|record| (record.key(), record.updated_at_ms))
                .collect();
            let records: Vec<RemoteRecord> = batch.iter().map(RemoteRecord::from).collect();

            debug!(rows = records.len(), "Uploading batch");
            let saved = inner.remote.save_records(records).await?;
            report.batches += 1;

            for reference in &saved.acknowledged {
                let Some(key) = reference.to_key() else {
                    continue;
                };
                let Some(updated_at_ms) = uploaded_versions.get(&key) else {
                    continue;
                };
                if inner.store.clear_sync_dirty(&key, *updated_at_ms)? {
                    report.uploaded += 1;
                } else {
                    report.superseded += 1;
                }
            }
            for failure in &saved.failed {
                warn!(
                    record_type = %failure.record.record_type,
                    name = %failure.record.record_name,
                    reason = %failure.reason,
                    "Remote refused record"
                );
                report.failed += 1;
            }

            if !full {
                break;
            }
        }

        Ok(report)
    }
}
