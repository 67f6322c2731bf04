//! Cursor-based incremental pull
//!
//! For each kind, in parent-first order: fetch the change feed from the
//! stored cursor, convert and apply each page in one transaction, then
//! persist the page's token. A kind is bootstrapped once the remote reports
//! no more results for it.
//!
//! Pull cycles are serialized by an async gate. Progress is observable
//! through [`PullEngine::state`].

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::cursor::CursorStore;
use super::error::{SyncError, SyncResult};
use super::remote::{RemoteError, RemoteRecord, RemoteStore};
use super::signals::{SyncEvent, SyncSignals};
use crate::models::{Record, RecordKind};
use crate::storage::local::upsert_in;
use crate::storage::{LocalStore, StorageError, WriteOrigin};

/// Where the engine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    Idle,
    /// Incremental fetch from a stored cursor
    Fetching(RecordKind),
    /// Fetch from the beginning (no cursor yet)
    Bootstrapping(RecordKind),
    Applying(RecordKind),
    AdvancingCursor(RecordKind),
}

/// Outcome of pulling one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPullReport {
    pub kind: RecordKind,
    pub pages: usize,
    pub fetched: usize,
    /// Rows that changed locally
    pub applied: usize,
    /// Malformed records left out
    pub skipped: usize,
    /// This call finished the kind's first full pull
    pub bootstrapped: bool,
    /// The stored cursor was rejected and the kind restarted from scratch
    pub restarted: bool,
    /// The restarted pull was rejected too; the next pull starts over
    pub incomplete: bool,
}

impl KindPullReport {
    fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            pages: 0,
            fetched: 0,
            applied: 0,
            skipped: 0,
            bootstrapped: false,
            restarted: false,
            incomplete: false,
        }
    }
}

/// Outcome of a full pull cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub kinds: Vec<KindPullReport>,
}

impl PullSummary {
    pub fn fetched(&self) -> usize {
        self.kinds.iter().map(|k| k.fetched).sum()
    }

    pub fn applied(&self) -> usize {
        self.kinds.iter().map(|k| k.applied).sum()
    }

    pub fn skipped(&self) -> usize {
        self.kinds.iter().map(|k| k.skipped).sum()
    }
}

pub struct PullEngine<R: RemoteStore> {
    store: Arc<LocalStore>,
    cursors: CursorStore,
    remote: Arc<R>,
    signals: SyncSignals,
    page_size: usize,
    gate: Mutex<()>,
    state: watch::Sender<PullState>,
}

impl<R: RemoteStore> PullEngine<R> {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<R>,
        signals: SyncSignals,
        page_size: usize,
    ) -> Self {
        let (state, _) = watch::channel(PullState::Idle);
        Self {
            cursors: CursorStore::new(Arc::clone(&store)),
            store,
            remote,
            signals,
            page_size: page_size.max(1),
            gate: Mutex::new(()),
            state,
        }
    }

    /// Watch the engine's progress
    pub fn state(&self) -> watch::Receiver<PullState> {
        self.state.subscribe()
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Pull every kind, parents first
    ///
    /// Any failure stops the cycle; pages committed before it stay, and the
    /// failing kind's cursor does not move. A failure before the initial
    /// pull ever completed is also announced as
    /// [`SyncEvent::InitialPullFailed`].
    pub async fn pull_all(&self, force_full_resync: bool) -> SyncResult<PullSummary> {
        let _gate = self.gate.lock().await;
        let result = self.pull_all_locked(force_full_resync).await;
        self.set_state(PullState::Idle);

        match result {
            Ok(summary) => {
                if self.cursors.all_bootstrapped()? && self.signals.announce_initial_pull() {
                    info!("Initial pull completed");
                }
                info!(
                    fetched = summary.fetched(),
                    applied = summary.applied(),
                    skipped = summary.skipped(),
                    "Pull cycle completed"
                );
                self.signals.emit(SyncEvent::PullCompleted {
                    applied: summary.applied(),
                });
                Ok(summary)
            }
            Err(e) if !self.signals.initial_pull_done() => {
                warn!(error = %e, "Initial pull failed");
                self.signals.emit(SyncEvent::InitialPullFailed {
                    error: e.to_string(),
                });
                Err(SyncError::InitialPullFailed(Box::new(e)))
            }
            Err(e) => {
                warn!(error = %e, "Pull cycle failed");
                Err(e)
            }
        }
    }

    async fn pull_all_locked(&self, force_full_resync: bool) -> SyncResult<PullSummary> {
        let mut summary = PullSummary::default();
        for kind in RecordKind::ALL {
            summary
                .kinds
                .push(self.pull_kind_locked(kind, force_full_resync).await?);
        }
        Ok(summary)
    }

    /// Pull a single kind
    ///
    /// With `force_full_resync` the kind's cursor is dropped first, so the
    /// whole feed is fetched again and re-applied through the resolver.
    pub async fn pull_kind(
        &self,
        kind: RecordKind,
        force_full_resync: bool,
    ) -> SyncResult<KindPullReport> {
        let _gate = self.gate.lock().await;
        let result = self.pull_kind_locked(kind, force_full_resync).await;
        self.set_state(PullState::Idle);
        result
    }

    async fn pull_kind_locked(
        &self,
        kind: RecordKind,
        force_full_resync: bool,
    ) -> SyncResult<KindPullReport> {
        if force_full_resync {
            self.cursors.reset(kind)?;
        }

        let mut report = KindPullReport::new(kind);
        loop {
            match self.pull_pages(kind, &mut report).await {
                Err(SyncError::Remote(RemoteError::InvalidCursor { .. })) if !report.restarted => {
                    warn!(%kind, "Change token rejected, pulling from the beginning");
                    self.cursors.reset(kind)?;
                    report.restarted = true;
                }
                Err(SyncError::Remote(RemoteError::InvalidCursor { .. })) => {
                    warn!(
                        %kind,
                        applied = report.applied,
                        "Change token rejected again after restart, keeping partial pull"
                    );
                    self.cursors.reset(kind)?;
                    report.incomplete = true;
                    return Ok(report);
                }
                other => return other.map(|()| report),
            }
        }
    }

    async fn pull_pages(&self, kind: RecordKind, report: &mut KindPullReport) -> SyncResult<()> {
        let mut since = self.cursors.get_cursor(kind)?;
        let was_bootstrapped = self.cursors.is_bootstrapped(kind)?;

        loop {
            self.set_state(if since.is_none() {
                PullState::Bootstrapping(kind)
            } else {
                PullState::Fetching(kind)
            });

            let page = self
                .remote
                .fetch_changes(kind, since.clone(), self.page_size)
                .await?;
            report.pages += 1;
            report.fetched += page.records.len();

            self.set_state(PullState::Applying(kind));
            let records = convert_page(kind, &page.records, &mut report.skipped);
            let applied = self.apply_page(&records)?;
            report.applied += applied;
            debug!(
                %kind,
                fetched = page.records.len(),
                applied,
                more = page.more_coming,
                "Applied page"
            );

            // The page is durable; only now may the cursor move past it
            self.set_state(PullState::AdvancingCursor(kind));
            let stalled = page.records.is_empty() && page.next_token == since;
            if let Some(token) = &page.next_token {
                self.cursors.set_cursor(kind, token)?;
            }
            since = page.next_token.or(since);

            if !page.more_coming {
                break;
            }
            if stalled {
                warn!(%kind, "Remote reported more changes without progress, stopping");
                return Ok(());
            }
        }

        if !was_bootstrapped {
            self.cursors.mark_bootstrapped(kind)?;
            report.bootstrapped = true;
            info!(%kind, "Bootstrap completed");
        }
        Ok(())
    }

    fn apply_page(&self, records: &[Record]) -> SyncResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let applied = self.store.transaction(|tx| {
            let mut applied = 0;
            for record in records {
                if upsert_in(tx, record, WriteOrigin::Remote)? {
                    applied += 1;
                }
            }
            Ok::<_, StorageError>(applied)
        })?;
        Ok(applied)
    }

    fn set_state(&self, state: PullState) {
        self.state.send_replace(state);
    }
}

/// Convert a page at the boundary, leaving out anything malformed
fn convert_page(kind: RecordKind, remote: &[RemoteRecord], skipped: &mut usize) -> Vec<Record> {
    let mut records = Vec::with_capacity(remote.len());
    for item in remote {
        match Record::try_from(item) {
            Ok(record) if record.kind() == kind => records.push(record),
            Ok(record) => {
                warn!(
                    expected = %kind,
                    found = %record.kind(),
                    name = %item.record_name,
                    "Skipping record of another kind"
                );
                *skipped += 1;
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed remote record");
                *skipped += 1;
            }
        }
    }
    records
}
