//! Tag command handlers

use std::sync::Arc;

use anyhow::Result;

use quire_core::models::{Fields, RecordKey, RecordKind};
use quire_core::{DerivedIndexRunner, LocalStore};

use crate::output::Output;

/// What `quire tags` lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagQuery {
    /// Every tag with usage counts
    All,
    Tag(String),
    Domain(String),
    Mixed,
}

impl TagQuery {
    pub fn from_args(tag: Option<String>, domain: Option<String>, mixed: bool) -> Self {
        match (tag, domain) {
            (Some(tag), _) => TagQuery::Tag(tag),
            (None, Some(domain)) => TagQuery::Domain(domain),
            (None, None) if mixed => TagQuery::Mixed,
            (None, None) => TagQuery::All,
        }
    }
}

/// List tags, or the blocks matching a tag query
pub fn run(store: LocalStore, query: TagQuery, output: &Output) -> Result<()> {
    let store = Arc::new(store);
    let runner = DerivedIndexRunner::new(Arc::clone(&store));

    let pending = runner.pending()?;
    if pending > 0 && !output.is_quiet() {
        eprintln!(
            "⚠ {} block(s) not indexed yet; run `quire index` for complete results",
            pending
        );
    }

    let ids = match query {
        TagQuery::All => {
            output.print_tags(&runner.tag_counts()?);
            return Ok(());
        }
        TagQuery::Tag(tag) => runner.blocks_with_tag(&tag)?,
        TagQuery::Domain(domain) => runner.blocks_in_domain(&domain)?,
        TagQuery::Mixed => runner.mixed_domain_blocks()?,
    };

    output.print_blocks(&block_previews(&store, ids)?);
    Ok(())
}

/// Pair block ids with their bodies, skipping ids that no longer resolve
fn block_previews(store: &LocalStore, ids: Vec<String>) -> Result<Vec<(String, String)>> {
    let mut previews = Vec::with_capacity(ids.len());
    for id in ids {
        let key = RecordKey::new(RecordKind::Block, id.as_str());
        if let Some(record) = store.get(&key)? {
            if let Fields::Block(block) = record.fields {
                previews.push((id, block.body));
            }
        }
    }
    Ok(previews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::models::BlockFields;

    #[test]
    fn test_query_from_args() {
        assert_eq!(TagQuery::from_args(None, None, false), TagQuery::All);
        assert_eq!(TagQuery::from_args(None, None, true), TagQuery::Mixed);
        assert_eq!(
            TagQuery::from_args(Some("rust".into()), None, false),
            TagQuery::Tag("rust".into())
        );
        assert_eq!(
            TagQuery::from_args(None, Some("work".into()), false),
            TagQuery::Domain("work".into())
        );
    }

    #[test]
    fn test_block_previews_skip_unknown_ids() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .write_local(
                "b1",
                Fields::Block(BlockFields {
                    body: "hello".into(),
                    tags_raw: "greeting".into(),
                }),
                false,
            )
            .unwrap();

        let previews = block_previews(&store, vec!["b1".into(), "missing".into()]).unwrap();
        assert_eq!(previews, vec![("b1".to_string(), "hello".to_string())]);
    }
}
