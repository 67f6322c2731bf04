//! Device identity
//!
//! Each install gets a random device id on first open, kept in `sync_kv`.
//! It labels log lines and status output; sync correctness never depends
//! on it. A destructive reset keeps it.

use crate::models::new_instance_id;
use crate::storage::kv::{kv_get, kv_set, DEVICE_ID_KEY};
use crate::storage::{LocalStore, StorageError, StorageResult};

/// This install's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    /// Whether the id was generated by this call
    pub is_new: bool,
}

impl DeviceIdentity {
    /// Read the device id, generating and storing one on first use
    pub fn load_or_create(store: &LocalStore) -> StorageResult<Self> {
        store.transaction(|tx| {
            if let Some(device_id) = kv_get(tx, DEVICE_ID_KEY)? {
                return Ok::<_, StorageError>(Self {
                    device_id,
                    is_new: false,
                });
            }
            let device_id = new_instance_id();
            kv_set(tx, DEVICE_ID_KEY, &device_id)?;
            Ok(Self {
                device_id,
                is_new: true,
            })
        })
    }

    /// First eight characters, for log labels
    pub fn short(&self) -> &str {
        self.device_id
            .get(..8)
            .unwrap_or(self.device_id.as_str())
    }
}
