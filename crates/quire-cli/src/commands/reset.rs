//! Reset command handler

use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};

use quire_core::LocalStore;

use crate::output::Output;

/// Wipe local state after confirmation
pub fn run(store: LocalStore, yes: bool, output: &Output) -> Result<()> {
    let unsent: i64 = store.counts()?.iter().map(|c| c.sync_dirty).sum();

    if !yes {
        if !output.should_prompt() {
            bail!("Refusing to reset without confirmation. Pass --yes.");
        }
        if unsent > 0 {
            println!(
                "{} local change(s) have not been pushed and will be lost.",
                unsent
            );
        }
        print!("Delete all local records, the tag index and sync cursors? [y/N] ");
        io::stdout().flush()?;

        if !confirmed(io::stdin().lock())? {
            output.message("Aborted.");
            return Ok(());
        }
    }

    store.reset_all()?;
    output.success("Local store reset; the next sync downloads everything again");
    Ok(())
}

fn confirmed(mut input: impl BufRead) -> Result<bool> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use quire_core::models::{BlockFields, Fields, RecordKind};

    #[test]
    fn test_confirmed() {
        assert!(confirmed("y\n".as_bytes()).unwrap());
        assert!(confirmed(" YES \n".as_bytes()).unwrap());
        assert!(!confirmed("\n".as_bytes()).unwrap());
        assert!(!confirmed("nope\n".as_bytes()).unwrap());
    }

    #[test]
    fn test_reset_requires_yes_outside_human_mode() {
        let store = LocalStore::open_in_memory().unwrap();
        let output = Output::new(OutputFormat::Json);
        assert!(run(store, false, &output).is_err());
    }

    #[test]
    fn test_reset_with_yes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quire.db");
        let store = LocalStore::open_path(&path).unwrap();
        store
            .write_local(
                "b1",
                Fields::Block(BlockFields {
                    body: "x".into(),
                    tags_raw: String::new(),
                }),
                false,
            )
            .unwrap();

        run(store, true, &Output::new(OutputFormat::Quiet)).unwrap();

        let reopened = LocalStore::open_path(&path).unwrap();
        assert!(reopened.live_records(RecordKind::Block).unwrap().is_empty());
    }
}
