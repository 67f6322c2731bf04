//! quire core library
//!
//! A local-first data layer: a device-resident SQLite mirror kept
//! consistent with a shared remote record store across devices, plus an
//! incrementally maintained tag/domain index derived from block content.
//!
//! # Architecture
//!
//! - **Local store**: SQLite, one table per record kind, per-row dirty flags
//! - **Sync**: debounced push, cursor-based pull, last-writer-wins by
//!   `updated_at_ms` with tombstones
//! - **Derived index**: `block_tags` / `block_domains`, rebuilt from
//!   `tags_raw` in bounded batches after every write
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(LocalStore::open(&config)?);
//! let remote = Arc::new(HttpRemote::new(url)?);
//! let ctx = SyncContext::new(&config, store, remote)?;
//! ctx.start();
//! ctx.pull_now(false).await?;
//! ```
//!
//! # Modules
//!
//! - `context`: the `SyncContext` hosts talk to (main entry point)
//! - `models`: record kinds, keys and typed fields
//! - `storage`: SQLite local store, schema and sync bookkeeping
//! - `sync`: remote store interface, pull/push engines, signals
//! - `index`: tag normalization and the derived index runner
//! - `relocate`: moving blocks between documents
//! - `config`: application configuration

pub mod config;
pub mod context;
pub mod identity;
pub mod index;
pub mod models;
pub mod relocate;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use context::SyncContext;
pub use identity::DeviceIdentity;
pub use index::{DerivedIndexRunner, DomainClass};
pub use models::{Fields, Record, RecordKey, RecordKind};
pub use relocate::{move_block, MoveError, MoveOutcome};
pub use storage::{LocalStore, StorageError};
pub use sync::{
    HttpRemote, MemoryRemote, PullEngine, PushScheduler, RemoteStore, SyncError, SyncEvent,
};
