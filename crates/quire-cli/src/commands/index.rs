//! Index command handler

use std::sync::Arc;

use anyhow::Result;

use quire_core::{Config, DerivedIndexRunner, LocalStore};

use crate::output::{Output, OutputFormat};

/// Bring the derived tag index up to date
pub async fn run(
    config: &Config,
    store: LocalStore,
    rebuild: bool,
    once: bool,
    output: &Output,
) -> Result<()> {
    let runner = DerivedIndexRunner::new(Arc::new(store));
    let batch_size = config.index_batch_size.max(1);

    let queued = if rebuild { runner.mark_all_dirty()? } else { 0 };

    let (batches, processed, remaining) = if once {
        let report = runner.run(batch_size)?;
        (usize::from(report.processed > 0), report.processed, report.remaining)
    } else {
        let report = runner.drain(batch_size).await?;
        (report.batches, report.processed, report.remaining)
    };

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "rebuild": rebuild,
                "queued": queued,
                "batches": batches,
                "processed": processed,
                "remaining": remaining
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", remaining);
        }
        OutputFormat::Human => {
            if rebuild {
                output.message(&format!("Queued {} block(s) for rebuild", queued));
            }
            output.success(&format!(
                "Indexed {} block(s) in {} batch(es)",
                processed, batches
            ));
            if remaining > 0 {
                output.message(&format!("  {} block(s) still pending", remaining));
            }
        }
    }

    Ok(())
}
