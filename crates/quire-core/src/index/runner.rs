//! Incremental maintenance of the derived tag index
//!
//! Blocks carry an `index_dirty` flag set by every write, local or remote.
//! A run takes a bounded batch of dirty blocks, recomputes their tags and
//! domain classification from `tags_raw`, and writes the derived rows. The
//! batch is read and computed outside the write lock; the write then only
//! lands for blocks whose timestamp is still the one that was read, so a
//! block edited in between stays dirty for the next run.

use std::sync::Arc;

use rusqlite::params;
use tracing::debug;

use super::tags::{classify, normalize_tag, parse_tags, DomainClass};
use crate::models::RecordKind;
use crate::storage::{DirtyKinds, LocalStore, StorageError, StorageResult};

/// Outcome of one bounded run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexRunReport {
    /// Blocks whose derived rows were rewritten
    pub processed: usize,
    /// Blocks still waiting after this run
    pub remaining: usize,
}

/// Outcome of draining the dirty set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batches: usize,
    pub processed: usize,
    pub remaining: usize,
}

struct DirtyBlock {
    instance_id: String,
    updated_at_ms: i64,
    deleted: bool,
    tags_raw: String,
}

struct Derived {
    block: DirtyBlock,
    tags: Vec<String>,
    class: DomainClass,
}

#[derive(Clone)]
pub struct DerivedIndexRunner {
    store: Arc<LocalStore>,
}

impl DerivedIndexRunner {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Process at most `limit` dirty blocks
    pub fn run(&self, limit: usize) -> StorageResult<IndexRunReport> {
        let batch = self.dirty_batch(limit.max(1))?;
        if batch.is_empty() {
            return Ok(IndexRunReport::default());
        }

        let derived: Vec<Derived> = batch
            .into_iter()
            .map(|block| {
                let tags = if block.deleted {
                    Vec::new()
                } else {
                    parse_tags(&block.tags_raw)
                };
                let class = classify(&tags);
                Derived { block, tags, class }
            })
            .collect();

        let (processed, remaining) = self.store.transaction(|tx| {
            let mut processed = 0;
            for item in &derived {
                let cleared = tx.execute(
                    "UPDATE blocks SET index_dirty = 0
                     WHERE instance_id = ? AND updated_at_ms = ? AND index_dirty = 1",
                    params![item.block.instance_id, item.block.updated_at_ms],
                )?;
                if cleared == 0 {
                    // Rewritten since it was read
                    continue;
                }

                let id = &item.block.instance_id;
                tx.execute("DELETE FROM block_tags WHERE block_id = ?", params![id])?;
                tx.execute("DELETE FROM block_domains WHERE block_id = ?", params![id])?;
                for tag in &item.tags {
                    tx.execute(
                        "INSERT INTO block_tags (block_id, tag) VALUES (?, ?)",
                        params![id, tag],
                    )?;
                }
                match &item.class {
                    DomainClass::Unclassified => {}
                    DomainClass::Single(domain) => {
                        tx.execute(
                            "INSERT INTO block_domains (block_id, domain, mixed) VALUES (?, ?, 0)",
                            params![id, domain],
                        )?;
                    }
                    DomainClass::Mixed(_) => {
                        tx.execute(
                            "INSERT INTO block_domains (block_id, domain, mixed) VALUES (?, NULL, 1)",
                            params![id],
                        )?;
                    }
                }
                processed += 1;
            }
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM blocks WHERE index_dirty = 1",
                [],
                |row| row.get(0),
            )?;
            Ok::<_, StorageError>((processed, remaining as usize))
        })?;

        debug!(processed, remaining, "Index batch written");
        Ok(IndexRunReport {
            processed,
            remaining,
        })
    }

    /// Run batches of `limit` until nothing is left, yielding in between
    pub async fn drain(&self, limit: usize) -> StorageResult<DrainReport> {
        let mut report = DrainReport::default();
        loop {
            let run = self.run(limit)?;
            report.remaining = run.remaining;
            if run.processed == 0 {
                break;
            }
            report.batches += 1;
            report.processed += run.processed;
            if run.remaining == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(report)
    }

    /// Queue blocks for reindexing
    pub fn mark_dirty<I, S>(&self, ids: I) -> StorageResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.mark_dirty(RecordKind::Block, ids, DirtyKinds::INDEX)
    }

    /// Queue every block; the next drain rebuilds the whole index
    pub fn mark_all_dirty(&self) -> StorageResult<usize> {
        self.store.transaction(|tx| {
            let changed = tx.execute("UPDATE blocks SET index_dirty = 1", [])?;
            Ok::<_, StorageError>(changed)
        })
    }

    pub fn pending(&self) -> StorageResult<i64> {
        self.store.index_dirty_count()
    }

    // ==================== Queries ====================

    /// Live blocks carrying `tag` (normalized before lookup)
    pub fn blocks_with_tag(&self, tag: &str) -> StorageResult<Vec<String>> {
        let Some(tag) = normalize_tag(tag) else {
            return Ok(Vec::new());
        };
        self.query_ids(
            "SELECT t.block_id FROM block_tags t
             JOIN blocks b ON b.instance_id = t.block_id
             WHERE t.tag = ? AND b.deleted = 0
             ORDER BY t.block_id",
            &tag,
        )
    }

    /// Live blocks classified under exactly this domain
    pub fn blocks_in_domain(&self, domain: &str) -> StorageResult<Vec<String>> {
        let Some(domain) = normalize_tag(domain) else {
            return Ok(Vec::new());
        };
        self.query_ids(
            "SELECT d.block_id FROM block_domains d
             JOIN blocks b ON b.instance_id = d.block_id
             WHERE d.domain = ? AND d.mixed = 0 AND b.deleted = 0
             ORDER BY d.block_id",
            &domain,
        )
    }

    /// Live blocks tagged with more than one domain
    pub fn mixed_domain_blocks(&self) -> StorageResult<Vec<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.block_id FROM block_domains d
                 JOIN blocks b ON b.instance_id = d.block_id
                 WHERE d.mixed = 1 AND b.deleted = 0
                 ORDER BY d.block_id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    pub fn tags_for_block(&self, block_id: &str) -> StorageResult<Vec<String>> {
        self.query_ids(
            "SELECT tag FROM block_tags WHERE block_id = ? ORDER BY tag",
            block_id,
        )
    }

    /// Every tag with its number of live blocks, most used first
    pub fn tag_counts(&self) -> StorageResult<Vec<(String, i64)>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.tag, COUNT(*) AS n FROM block_tags t
                 JOIN blocks b ON b.instance_id = t.block_id
                 WHERE b.deleted = 0
                 GROUP BY t.tag
                 ORDER BY n DESC, t.tag",
            )?;
            let counts = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(counts)
        })
    }

    fn dirty_batch(&self, limit: usize) -> StorageResult<Vec<DirtyBlock>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT instance_id, updated_at_ms, deleted, tags_raw FROM blocks
                 WHERE index_dirty = 1
                 ORDER BY updated_at_ms
                 LIMIT ?",
            )?;
            let blocks = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(DirtyBlock {
                        instance_id: row.get(0)?,
                        updated_at_ms: row.get(1)?,
                        deleted: row.get(2)?,
                        tags_raw: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(blocks)
        })
    }

    fn query_ids(&self, sql: &str, arg: &str) -> StorageResult<Vec<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let ids = stmt
                .query_map(params![arg], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockFields, Fields, Record, RecordKey};
    use crate::storage::WriteOrigin;

    fn setup() -> (Arc<LocalStore>, DerivedIndexRunner) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let runner = DerivedIndexRunner::new(Arc::clone(&store));
        (store, runner)
    }

    fn write_block(store: &LocalStore, id: &str, tags_raw: &str) -> Record {
        store
            .write_local(
                id,
                Fields::Block(BlockFields {
                    body: String::new(),
                    tags_raw: tags_raw.to_string(),
                }),
                false,
            )
            .unwrap()
    }

    #[test]
    fn test_run_indexes_tags_and_domains() {
        let (store, runner) = setup();
        write_block(&store, "b1", r#"["Rust", "domain:work"]"#);
        write_block(&store, "b2", "rust, domain:home, domain:work");
        write_block(&store, "b3", "");

        let report = runner.run(10).unwrap();
        assert_eq!(report, IndexRunReport { processed: 3, remaining: 0 });

        assert_eq!(runner.blocks_with_tag("#RUST").unwrap(), vec!["b1", "b2"]);
        assert_eq!(runner.blocks_in_domain("Work").unwrap(), vec!["b1"]);
        assert_eq!(runner.mixed_domain_blocks().unwrap(), vec!["b2"]);
        assert_eq!(runner.tags_for_block("b1").unwrap(), vec!["domain:work", "rust"]);
        assert!(runner.tags_for_block("b3").unwrap().is_empty());

        let counts = runner.tag_counts().unwrap();
        assert_eq!(counts[0], ("domain:work".to_string(), 2));
    }

    #[test]
    fn test_run_is_bounded() {
        let (store, runner) = setup();
        for i in 0..5 {
            write_block(&store, &format!("b{}", i), "x");
        }

        let report = runner.run(2).unwrap();
        assert_eq!(report, IndexRunReport { processed: 2, remaining: 3 });
        assert_eq!(runner.pending().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_drain_empties_dirty_set() {
        let (store, runner) = setup();
        for i in 0..7 {
            write_block(&store, &format!("b{}", i), "x");
        }

        let report = runner.drain(3).await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.processed, 7);
        assert_eq!(report.remaining, 0);
        assert_eq!(runner.blocks_with_tag("x").unwrap().len(), 7);

        // Nothing left: a second drain does no work
        assert_eq!(runner.drain(3).await.unwrap(), DrainReport::default());
    }

    #[test]
    fn test_edit_replaces_derived_rows() {
        let (store, runner) = setup();
        write_block(&store, "b1", "old, domain:work");
        runner.run(10).unwrap();

        write_block(&store, "b1", "new");
        runner.run(10).unwrap();

        assert_eq!(runner.tags_for_block("b1").unwrap(), vec!["new"]);
        assert!(runner.blocks_in_domain("work").unwrap().is_empty());
    }

    #[test]
    fn test_tombstone_removes_derived_rows() {
        let (store, runner) = setup();
        write_block(&store, "b1", "keep");
        runner.run(10).unwrap();

        store
            .delete_local(&RecordKey::new(RecordKind::Block, "b1"))
            .unwrap();
        runner.run(10).unwrap();
        assert!(runner.tags_for_block("b1").unwrap().is_empty());
        assert!(runner.tag_counts().unwrap().is_empty());
    }

    #[test]
    fn test_remote_apply_marks_index_dirty() {
        let (store, runner) = setup();
        let record = Record {
            instance_id: "b1".into(),
            updated_at_ms: 10,
            deleted: false,
            fields: Fields::Block(BlockFields {
                body: String::new(),
                tags_raw: "remote".into(),
            }),
        };
        store.upsert(&record, WriteOrigin::Remote).unwrap();

        assert_eq!(runner.pending().unwrap(), 1);
        runner.run(10).unwrap();
        assert_eq!(runner.blocks_with_tag("remote").unwrap(), vec!["b1"]);
    }

    #[test]
    fn test_mark_all_dirty_rebuilds() {
        let (store, runner) = setup();
        write_block(&store, "b1", "a");
        write_block(&store, "b2", "b");
        runner.run(10).unwrap();

        store
            .transaction(|tx| {
                tx.execute("DELETE FROM block_tags", [])?;
                Ok::<_, StorageError>(())
            })
            .unwrap();
        assert_eq!(runner.mark_all_dirty().unwrap(), 2);
        runner.run(10).unwrap();
        assert_eq!(runner.tag_counts().unwrap().len(), 2);

        assert_eq!(runner.mark_dirty(["b1"]).unwrap(), 1);
        assert_eq!(runner.pending().unwrap(), 1);
    }
}
