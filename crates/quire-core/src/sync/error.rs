//! Sync error types

use thiserror::Error;

use super::remote::RemoteError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The first bootstrap did not complete
    #[error("initial pull failed: {0}")]
    InitialPullFailed(#[source] Box<SyncError>),
}

impl SyncError {
    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Storage(e) => e.is_retryable(),
            SyncError::Remote(e) => e.is_transient(),
            SyncError::InitialPullFailed(inner) => inner.is_transient(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
