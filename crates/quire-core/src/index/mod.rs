//! Derived tag/domain index
//!
//! Secondary data computed from `blocks.tags_raw`, kept correct after
//! every local or remote write. Never synced.

pub mod runner;
pub mod tags;

pub use runner::{DerivedIndexRunner, DrainReport, IndexRunReport};
pub use tags::{classify, normalize_tag, parse_tags, DomainClass};
