//! Sync command handler

use std::sync::Arc;

use anyhow::{bail, Result};

use quire_core::sync::{PullSummary, PushReport};
use quire_core::{Config, HttpRemote, LocalStore, SyncContext};

use crate::output::{Output, OutputFormat};

/// Which halves of a sync round to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Both,
    PullOnly,
    PushOnly,
}

impl SyncMode {
    pub fn from_flags(pull_only: bool, push_only: bool) -> Self {
        match (pull_only, push_only) {
            (true, _) => SyncMode::PullOnly,
            (_, true) => SyncMode::PushOnly,
            _ => SyncMode::Both,
        }
    }

    fn pulls(self) -> bool {
        self != SyncMode::PushOnly
    }

    fn pushes(self) -> bool {
        self != SyncMode::PullOnly
    }
}

/// Build the HTTP remote from configuration
pub fn remote_from_config(config: &Config) -> Result<HttpRemote> {
    if !config.sync_enabled {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             quire config set sync_enabled true\n  \
             quire config set remote_url https://your-server"
        );
    }

    let Some(ref remote_url) = config.remote_url else {
        bail!(
            "Remote URL not configured. Set it with:\n  \
             quire config set remote_url https://your-server"
        );
    };

    Ok(HttpRemote::new(remote_url.as_str())?)
}

/// Open a sync context over the configured remote
pub fn open_context(
    config: &Config,
    store: Arc<LocalStore>,
) -> Result<SyncContext<HttpRemote>> {
    let remote = remote_from_config(config)?;
    Ok(SyncContext::new(config, store, Arc::new(remote))?)
}

/// Whether the configuration allows talking to a remote at all
pub fn is_configured(config: &Config) -> bool {
    config.sync_enabled && config.remote_url.is_some()
}

/// Pull then push, then bring the index up to date
pub async fn run(
    config: &Config,
    store: LocalStore,
    mode: SyncMode,
    full: bool,
    output: &Output,
) -> Result<()> {
    let ctx = open_context(config, Arc::new(store))?;

    output.message(&format!(
        "Syncing with {}...",
        config.remote_url.as_deref().unwrap_or_default()
    ));

    let pulled = if mode.pulls() {
        Some(ctx.pull_now(full).await?)
    } else {
        None
    };
    // Also uploads rows the pull found stale on the remote
    let pushed = if mode.pushes() {
        Some(ctx.push_now().await?)
    } else {
        None
    };
    let indexed = ctx.drain_index().await?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "pull": pulled.as_ref().map(pull_json),
                "push": pushed.as_ref().map(push_json),
                "indexed": indexed.processed
            }));
        }
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            if let Some(ref summary) = pulled {
                output.success(&format!(
                    "Pulled {} record(s), applied {}, skipped {}",
                    summary.fetched(),
                    summary.applied(),
                    summary.skipped()
                ));
                for kind in summary.kinds.iter().filter(|k| k.restarted) {
                    let note = if kind.incomplete {
                        "change token rejected twice, finishes on the next sync"
                    } else {
                        "change token expired, re-downloaded"
                    };
                    output.message(&format!("  {}: {}", kind.kind, note));
                }
            }
            if let Some(ref report) = pushed {
                output.success(&format!(
                    "Pushed {} record(s) in {} batch(es)",
                    report.uploaded, report.batches
                ));
                if report.failed > 0 {
                    output.message(&format!(
                        "  {} record(s) refused by the remote; they stay queued",
                        report.failed
                    ));
                }
            }
            if indexed.processed > 0 {
                output.message(&format!("  Indexed {} block(s)", indexed.processed));
            }
        }
    }

    Ok(())
}

fn pull_json(summary: &PullSummary) -> serde_json::Value {
    let kinds: Vec<_> = summary
        .kinds
        .iter()
        .map(|k| {
            serde_json::json!({
                "kind": k.kind.record_type(),
                "pages": k.pages,
                "fetched": k.fetched,
                "applied": k.applied,
                "skipped": k.skipped,
                "bootstrapped": k.bootstrapped,
                "restarted": k.restarted,
                "incomplete": k.incomplete
            })
        })
        .collect();
    serde_json::json!({
        "fetched": summary.fetched(),
        "applied": summary.applied(),
        "skipped": summary.skipped(),
        "kinds": kinds
    })
}

fn push_json(report: &PushReport) -> serde_json::Value {
    serde_json::json!({
        "batches": report.batches,
        "uploaded": report.uploaded,
        "failed": report.failed,
        "superseded": report.superseded
    })
}
