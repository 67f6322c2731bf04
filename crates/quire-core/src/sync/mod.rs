//! Bidirectional sync with a shared remote record store
//!
//! ## Flow
//!
//! 1. Local mutations mark rows sync-dirty and request a debounced push
//! 2. [`PushScheduler`] uploads dirty rows, clearing acknowledged ones
//! 3. [`PullEngine`] fetches each kind's change feed from its cursor and
//!    applies records through the last-writer-wins resolver
//! 4. [`SyncSignals`] announce completed cycles after they commit
//!
//! ## Usage
//!
//! ```ignore
//! let engine = PullEngine::new(store, Arc::new(remote), signals, 200);
//! let summary = engine.pull_all(false).await?;
//! ```

pub mod backoff;
pub mod conflict;
pub mod cursor;
mod error;
pub mod pull;
pub mod push;
pub mod record;
pub mod remote;
pub mod signals;

pub use backoff::Backoff;
pub use conflict::{resolve, should_apply, Resolution};
pub use cursor::{ChangeToken, CursorStore};
pub use error::{SyncError, SyncResult};
pub use pull::{KindPullReport, PullEngine, PullState, PullSummary};
pub use push::{PushReport, PushScheduler};
pub use record::RecordError;
pub use remote::{
    ChangePage, HttpRemote, MemoryRemote, RecordRef, RemoteError, RemoteRecord, RemoteStore,
    SaveFailure, SaveReport,
};
pub use signals::{SyncEvent, SyncSignals};
