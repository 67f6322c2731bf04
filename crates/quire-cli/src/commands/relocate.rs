//! Move command handler

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use quire_core::{move_block, Config, DerivedIndexRunner, LocalStore};

use super::sync::{is_configured, open_context};
use crate::output::{short_id, Output, OutputFormat};

/// Move a block, reindex it, and push the change when sync is configured
pub async fn run(
    config: &Config,
    store: LocalStore,
    block_id: &str,
    document_id: &str,
    output: &Output,
) -> Result<()> {
    let store = Arc::new(store);
    let outcome = move_block(&store, block_id, document_id).context("Move refused")?;

    DerivedIndexRunner::new(Arc::clone(&store))
        .drain(config.index_batch_size.max(1))
        .await?;

    let pushed = if is_configured(config) {
        let ctx = open_context(config, Arc::clone(&store))?;
        match ctx.push_now().await {
            Ok(report) => report.failed == 0,
            Err(e) => {
                warn!(error = %e, "Push after move failed");
                if !output.is_quiet() {
                    eprintln!("⚠ Push failed, the move stays queued: {}", e);
                }
                false
            }
        }
    } else {
        false
    };

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "block_id": outcome.block.instance_id,
                "from_document_id": outcome.from_document_id,
                "to_document_id": outcome.to_document_id,
                "placement_id": outcome.new_placement.instance_id,
                "pushed": pushed
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", outcome.new_placement.instance_id);
        }
        OutputFormat::Human => {
            output.success(&format!(
                "Moved block {} from {} to {}",
                short_id(&outcome.block.instance_id),
                short_id(&outcome.from_document_id),
                short_id(&outcome.to_document_id)
            ));
            if !pushed {
                output.message("  Change is queued for the next sync");
            }
        }
    }

    Ok(())
}
