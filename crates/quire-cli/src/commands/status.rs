//! Status command handler

use std::sync::Arc;

use anyhow::Result;

use quire_core::sync::CursorStore;
use quire_core::{Config, DeviceIdentity, LocalStore, RecordKind};

use crate::output::{Output, OutputFormat};

/// Per-kind sync position
struct KindStatus {
    kind: RecordKind,
    live: i64,
    tombstoned: i64,
    sync_dirty: i64,
    cursor: Option<String>,
    bootstrapped: bool,
}

/// Show status information
pub fn show(config: &Config, store: LocalStore, output: &Output) -> Result<()> {
    let store = Arc::new(store);
    let device = DeviceIdentity::load_or_create(&store)?;
    let cursors = CursorStore::new(Arc::clone(&store));
    let index_pending = store.index_dirty_count()?;

    let mut kinds = Vec::new();
    for count in store.counts()? {
        kinds.push(KindStatus {
            kind: count.kind,
            live: count.live,
            tombstoned: count.tombstoned,
            sync_dirty: count.sync_dirty,
            cursor: cursors.get_cursor(count.kind)?.map(|t| t.0),
            bootstrapped: cursors.is_bootstrapped(count.kind)?,
        });
    }

    match output.format {
        OutputFormat::Json => {
            let json_kinds: Vec<_> = kinds
                .iter()
                .map(|k| {
                    serde_json::json!({
                        "kind": k.kind.record_type(),
                        "live": k.live,
                        "tombstoned": k.tombstoned,
                        "sync_dirty": k.sync_dirty,
                        "cursor": k.cursor,
                        "bootstrapped": k.bootstrapped
                    })
                })
                .collect();
            output.json(&serde_json::json!({
                "device_id": device.device_id,
                "sync_enabled": config.sync_enabled,
                "remote_url": config.remote_url,
                "database": config.sqlite_path(),
                "index_pending": index_pending,
                "kinds": json_kinds
            }));
        }
        OutputFormat::Quiet => {
            let dirty: i64 = kinds.iter().map(|k| k.sync_dirty).sum();
            println!("{} {}", dirty, index_pending);
        }
        OutputFormat::Human => {
            println!("quire Status");
            println!("============");
            println!();
            println!("Device: {}", device.device_id);
            println!();
            println!("Sync:");
            println!(
                "  Status: {}",
                if config.sync_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if let Some(ref url) = config.remote_url {
                println!("  Remote: {}", url);
            }
            println!();
            println!("Storage:");
            println!("  Database: {}", config.sqlite_path().display());
            println!("  Index pending: {}", index_pending);
            println!();
            println!(
                "  {:<12} {:>7} {:>7} {:>7}  {}",
                "kind", "live", "deleted", "dirty", "cursor"
            );
            for k in &kinds {
                let cursor = match (&k.cursor, k.bootstrapped) {
                    (Some(token), _) => token.clone(),
                    (None, true) => "(bootstrapped)".to_string(),
                    (None, false) => "(not pulled)".to_string(),
                };
                println!(
                    "  {:<12} {:>7} {:>7} {:>7}  {}",
                    k.kind.record_type(),
                    k.live,
                    k.tombstoned,
                    k.sync_dirty,
                    cursor
                );
            }
        }
    }

    Ok(())
}
