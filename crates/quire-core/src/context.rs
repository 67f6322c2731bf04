//! Sync context
//!
//! One explicit object wiring the local store, the pull and push engines,
//! the derived index and the signals. Hosts create it once, call
//! [`SyncContext::start`] inside a tokio runtime, and drive everything
//! through its methods.
//!
//! ```text
//! let ctx = SyncContext::new(&config, store, Arc::new(remote))?;
//! let _listener = ctx.start();
//! ctx.force_pull_now(false);
//! ctx.save(&block_id, fields)?;      // schedules a debounced push
//! ctx.move_block(&block_id, &doc_id); // atomic, then push + reindex
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::identity::DeviceIdentity;
use crate::index::{DerivedIndexRunner, DrainReport, IndexRunReport};
use crate::models::{new_instance_id, Fields, Record, RecordKey};
use crate::relocate::{self, MoveError, MoveOutcome};
use crate::storage::{LocalStore, StorageResult};
use crate::sync::backoff::Backoff;
use crate::sync::pull::{PullEngine, PullSummary};
use crate::sync::push::{PushReport, PushScheduler};
use crate::sync::remote::RemoteStore;
use crate::sync::signals::{SyncEvent, SyncSignals};
use crate::sync::SyncResult;

struct Inner<R: RemoteStore> {
    store: Arc<LocalStore>,
    device: DeviceIdentity,
    signals: SyncSignals,
    pull: PullEngine<R>,
    push: PushScheduler<R>,
    index: DerivedIndexRunner,
    index_wake: Arc<Notify>,
    push_debounce: Duration,
    index_batch_size: usize,
}

pub struct SyncContext<R: RemoteStore> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteStore> Clone for SyncContext<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteStore> SyncContext<R> {
    pub fn new(config: &Config, store: Arc<LocalStore>, remote: Arc<R>) -> StorageResult<Self> {
        let device = DeviceIdentity::load_or_create(&store)?;
        if device.is_new {
            info!(device = %device.short(), "Registered new device");
        }

        let signals = SyncSignals::new();
        let pull = PullEngine::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            signals.clone(),
            config.pull_page_size,
        );
        let push = PushScheduler::new(
            Arc::clone(&store),
            remote,
            signals.clone(),
            config.push_batch_size,
            Backoff::from_config(config),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                index: DerivedIndexRunner::new(Arc::clone(&store)),
                store,
                device,
                signals,
                pull,
                push,
                index_wake: Arc::new(Notify::new()),
                push_debounce: config.push_debounce(),
                index_batch_size: config.index_batch_size.max(1),
            }),
        })
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.inner.store
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.device
    }

    pub fn pull_engine(&self) -> &PullEngine<R> {
        &self.inner.pull
    }

    pub fn push_scheduler(&self) -> &PushScheduler<R> {
        &self.inner.push
    }

    pub fn index(&self) -> &DerivedIndexRunner {
        &self.inner.index
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.signals.subscribe()
    }

    pub async fn wait_initial_pull(&self) {
        self.inner.signals.wait_initial_pull().await
    }

    /// Spawn the index listener
    ///
    /// Drains the derived index after every committed pull and after local
    /// writes made through this context. Ends when the context and every
    /// engine task holding the signals are gone.
    pub fn start(&self) -> JoinHandle<()> {
        let mut events = self.subscribe();
        let index = self.inner.index.clone();
        let wake = Arc::clone(&self.inner.index_wake);
        let batch_size = self.inner.index_batch_size;
        let device = self.inner.device.short().to_string();

        tokio::spawn(async move {
            debug!(%device, "Index listener started");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(SyncEvent::PullCompleted { .. }) => {}
                        Ok(_) => continue,
                        // Missed events may have included a pull
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = wake.notified() => {}
                }

                match index.drain(batch_size).await {
                    Ok(report) if report.processed > 0 => {
                        debug!(processed = report.processed, "Derived index updated");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Derived index run failed"),
                }
            }
            debug!(%device, "Index listener stopped");
        })
    }

    // ==================== Sync ====================

    /// Debounced push; see [`PushScheduler::schedule_push`]
    pub fn schedule_push(&self, debounce: Duration) {
        self.inner.push.schedule_push(debounce);
    }

    /// Upload now and wait for the result
    pub async fn push_now(&self) -> SyncResult<PushReport> {
        self.inner.push.push_now().await
    }

    /// Start a pull cycle in the background
    ///
    /// Failures are logged by the engine; the handle can be awaited for
    /// the outcome.
    pub fn force_pull_now(&self, force_full_resync: bool) -> JoinHandle<SyncResult<PullSummary>> {
        let this = self.clone();
        tokio::spawn(async move { this.pull_now(force_full_resync).await })
    }

    /// Run a pull cycle and wait for it
    pub async fn pull_now(&self, force_full_resync: bool) -> SyncResult<PullSummary> {
        if force_full_resync {
            info!("Forcing full resync");
        }
        self.inner.pull.pull_all(force_full_resync).await
    }

    // ==================== Local mutations ====================

    /// Create a record with a fresh id
    pub fn create(&self, fields: Fields) -> StorageResult<Record> {
        self.save(&new_instance_id(), fields)
    }

    /// Write a record as a local mutation and schedule a push
    pub fn save(&self, instance_id: &str, fields: Fields) -> StorageResult<Record> {
        let record = self.inner.store.write_local(instance_id, fields, false)?;
        self.after_local_change(record.kind().is_indexed());
        Ok(record)
    }

    /// Tombstone a record and schedule a push
    pub fn delete(&self, key: &RecordKey) -> StorageResult<Record> {
        let record = self.inner.store.delete_local(key)?;
        self.after_local_change(key.kind.is_indexed());
        Ok(record)
    }

    /// Move a block to the end of another document
    ///
    /// Returns false (and logs why) when the move was refused; nothing is
    /// written in that case.
    pub fn move_block(&self, block_id: &str, to_document_id: &str) -> bool {
        match self.try_move_block(block_id, to_document_id) {
            Ok(_) => true,
            Err(e) => {
                warn!(block = %block_id, to = %to_document_id, error = %e, "Move refused");
                false
            }
        }
    }

    pub fn try_move_block(
        &self,
        block_id: &str,
        to_document_id: &str,
    ) -> Result<MoveOutcome, MoveError> {
        let outcome = relocate::move_block(&self.inner.store, block_id, to_document_id)?;
        self.after_local_change(true);
        Ok(outcome)
    }

    // ==================== Derived index ====================

    /// One bounded index run; `None` uses the configured batch size
    pub fn run_derived_index(&self, limit: Option<usize>) -> StorageResult<IndexRunReport> {
        self.inner
            .index
            .run(limit.unwrap_or(self.inner.index_batch_size))
    }

    /// Run index batches until nothing is dirty
    pub async fn drain_index(&self) -> StorageResult<DrainReport> {
        self.inner.index.drain(self.inner.index_batch_size).await
    }

    /// Destructive reset of local state; the next pull bootstraps again
    pub fn reset_local(&self) -> StorageResult<()> {
        warn!(device = %self.inner.device.short(), "Resetting local store");
        self.inner.store.reset_all()
    }

    fn after_local_change(&self, reindex: bool) {
        self.inner.push.schedule_push(self.inner.push_debounce);
        if reindex {
            self.inner.index_wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockFields, RecordKind};
    use crate::sync::remote::MemoryRemote;

    fn context(remote: &MemoryRemote) -> SyncContext<MemoryRemote> {
        let config = Config {
            push_debounce_ms: 100,
            ..Config::default()
        };
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        SyncContext::new(&config, store, Arc::new(remote.clone())).unwrap()
    }

    fn block(tags_raw: &str) -> Fields {
        Fields::Block(BlockFields {
            body: "body".into(),
            tags_raw: tags_raw.into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_pushes_after_debounce_and_reindexes() {
        let remote = MemoryRemote::new();
        let ctx = context(&remote);
        let listener = ctx.start();
        let mut events = ctx.subscribe();

        let record = ctx.create(block("rust")).unwrap();
        assert!(remote.is_empty());

        loop {
            if let SyncEvent::PushCompleted { uploaded, .. } = events.recv().await.unwrap() {
                assert_eq!(uploaded, 1);
                break;
            }
        }
        assert!(remote.get(RecordKind::Block, &record.instance_id).is_some());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            ctx.index().blocks_with_tag("rust").unwrap(),
            vec![record.instance_id.clone()]
        );
        listener.abort();
    }

    #[tokio::test]
    async fn test_force_pull_now_applies_and_announces() {
        let remote = MemoryRemote::new();
        let writer = context(&remote);
        writer.create(block("shared")).unwrap();
        writer.push_now().await.unwrap();

        let reader = context(&remote);
        let summary = reader.force_pull_now(false).await.unwrap().unwrap();
        assert_eq!(summary.applied(), 1);

        tokio::time::timeout(Duration::from_secs(1), reader.wait_initial_pull())
            .await
            .unwrap();
        assert_eq!(reader.run_derived_index(None).unwrap().processed, 1);
        assert_eq!(reader.index().blocks_with_tag("shared").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_move_block_reports_refusal() {
        let remote = MemoryRemote::new();
        let ctx = context(&remote);
        assert!(!ctx.move_block("missing", "nowhere"));
        assert!(!ctx.move_block("", "doc"));
    }

    #[tokio::test]
    async fn test_reset_local_keeps_device() {
        let remote = MemoryRemote::new();
        let ctx = context(&remote);
        let record = ctx.create(block("x")).unwrap();

        ctx.reset_local().unwrap();
        assert!(ctx.store().get(&record.key()).unwrap().is_none());
        let device = DeviceIdentity::load_or_create(ctx.store()).unwrap();
        assert_eq!(device.device_id, ctx.device().device_id);
    }
}
