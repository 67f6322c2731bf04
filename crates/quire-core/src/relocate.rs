//! Moving a block between documents
//!
//! A move runs in one transaction: every live placement of the block is
//! tombstoned, a fresh placement binds the block to the end of the
//! destination document, and the block's domain tag is swapped. Concurrent
//! moves on two devices can leave a block placed twice; moving it again
//! collapses that back to a single placement. The block keeps its identity,
//! so attachments and references follow it. Nothing is written unless every
//! check passes.

use thiserror::Error;
use tracing::info;

use crate::index::tags::retag_for_move;
use crate::models::{
    new_instance_id, BlockFields, Fields, PlacementFields, Record, RecordKey, RecordKind,
};
use crate::storage::local::{
    live_placements_in, next_append_order_key_in, read_record_in, tombstone_in, write_local_in,
};
use crate::storage::{LocalStore, StorageError};

#[derive(Error, Debug)]
pub enum MoveError {
    #[error("Block id and destination document id must not be empty")]
    EmptyId,

    #[error("Block '{0}' does not exist")]
    BlockNotFound(String),

    #[error("Block '{0}' is not placed in any document")]
    NotPlaced(String),

    #[error("Destination document '{0}' does not exist")]
    DestinationNotFound(String),

    #[error("Block '{block_id}' is already in document '{document_id}'")]
    SameDocument {
        block_id: String,
        document_id: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<rusqlite::Error> for MoveError {
    fn from(e: rusqlite::Error) -> Self {
        MoveError::Storage(StorageError::Database(e))
    }
}

/// Rows written by a successful move
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub block: Record,
    /// Source placements, now tombstoned, newest first
    pub old_placements: Vec<Record>,
    pub new_placement: Record,
    pub from_document_id: String,
    pub to_document_id: String,
}

/// Move `block_id` to the end of `to_document_id`
pub fn move_block(
    store: &LocalStore,
    block_id: &str,
    to_document_id: &str,
) -> Result<MoveOutcome, MoveError> {
    if block_id.trim().is_empty() || to_document_id.trim().is_empty() {
        return Err(MoveError::EmptyId);
    }

    let outcome = store.transaction(|tx| -> Result<MoveOutcome, MoveError> {
        let block_key = RecordKey::new(RecordKind::Block, block_id);
        let block = read_record_in(tx, &block_key)?
            .filter(|r| !r.deleted)
            .ok_or_else(|| MoveError::BlockNotFound(block_id.to_string()))?;
        let block_fields = match &block.fields {
            Fields::Block(fields) => fields.clone(),
            _ => return Err(corrupt(&block_key, "expected block fields")),
        };

        let placements = live_placements_in(tx, block_id)?;
        if placements.is_empty() {
            return Err(MoveError::NotPlaced(block_id.to_string()));
        }
        let mut source_ids = Vec::with_capacity(placements.len());
        for placement in &placements {
            match &placement.fields {
                Fields::Placement(fields) => source_ids.push(fields.document_id.clone()),
                _ => return Err(corrupt(&placement.key(), "expected placement fields")),
            }
        }
        let Some(from_document_id) = source_ids
            .iter()
            .find(|id| id.as_str() != to_document_id)
            .cloned()
        else {
            return Err(MoveError::SameDocument {
                block_id: block_id.to_string(),
                document_id: to_document_id.to_string(),
            });
        };

        let destination = read_record_in(tx, &document_key(to_document_id))?
            .filter(|r| !r.deleted)
            .ok_or_else(|| MoveError::DestinationNotFound(to_document_id.to_string()))?;

        // A missing or deleted source document just has no domain to remove
        let mut sources = Vec::new();
        for id in &source_ids {
            if let Some(document) = read_record_in(tx, &document_key(id))? {
                sources.push(document);
            }
        }
        let from_domains: Vec<&str> = sources.iter().filter_map(document_domain).collect();

        let mut old_placements = Vec::with_capacity(placements.len());
        for placement in &placements {
            old_placements.push(tombstone_in(tx, &placement.key())?);
        }

        let order_key = next_append_order_key_in(tx, RecordKind::Placement, to_document_id)?;
        let new_placement = write_local_in(
            tx,
            &new_instance_id(),
            Fields::Placement(PlacementFields {
                block_id: block_id.to_string(),
                document_id: to_document_id.to_string(),
                order_key,
            }),
            false,
        )?;

        let tags_raw = retag_for_move(
            &block_fields.tags_raw,
            &from_domains,
            document_domain(&destination),
        );
        let block = write_local_in(
            tx,
            block_id,
            Fields::Block(BlockFields {
                body: block_fields.body,
                tags_raw,
            }),
            false,
        )?;

        Ok(MoveOutcome {
            block,
            old_placements,
            new_placement,
            from_document_id,
            to_document_id: to_document_id.to_string(),
        })
    })?;

    info!(
        block = %block_id,
        from = %outcome.from_document_id,
        to = %outcome.to_document_id,
        placements = outcome.old_placements.len(),
        "Moved block"
    );
    Ok(outcome)
}

fn document_key(id: &str) -> RecordKey {
    RecordKey::new(RecordKind::Document, id)
}

fn document_domain(document: &Record) -> Option<&str> {
    match &document.fields {
        Fields::Document(fields) => fields.domain.as_deref(),
        _ => None,
    }
}

fn corrupt(key: &RecordKey, details: &str) -> MoveError {
    MoveError::Storage(StorageError::CorruptRow {
        key: key.clone(),
        details: details.to_string(),
    })
}
