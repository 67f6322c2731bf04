//! Storage layer
//!
//! The local SQLite mirror of every remote record kind.
//!
//! ## Architecture
//!
//! - **Entity tables**: one per record kind, each row carrying its own
//!   timestamp, tombstone flag and dirty flags
//! - **Derived tables**: `block_tags` / `block_domains`, rebuilt by the
//!   index runner and never synced
//! - **sync_kv**: cursors, bootstrap flags, device id

pub mod error;
pub mod kv;
pub mod local;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use local::{DirtyKinds, KindCount, LocalStore, WriteOrigin};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
