//! Data models for quire
//!
//! Every entity kind is mirrored 1:1 between a local SQLite table and a
//! remote record type. A [`Record`] is the typed form of one row: identity,
//! version (timestamp + tombstone) and the kind-specific [`Fields`].

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One mirrored entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    Container,
    Section,
    Document,
    /// A content unit. Identity and payload only; placement lives elsewhere.
    Block,
    /// Binds a block into a document at an order key
    Placement,
    Attachment,
}

impl RecordKind {
    /// All kinds, parents before children
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Container,
        RecordKind::Section,
        RecordKind::Document,
        RecordKind::Block,
        RecordKind::Placement,
        RecordKind::Attachment,
    ];

    /// Local table name
    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Container => "containers",
            RecordKind::Section => "sections",
            RecordKind::Document => "documents",
            RecordKind::Block => "blocks",
            RecordKind::Placement => "placements",
            RecordKind::Attachment => "attachments",
        }
    }

    /// Remote record type name
    pub fn record_type(self) -> &'static str {
        match self {
            RecordKind::Container => "Container",
            RecordKind::Section => "Section",
            RecordKind::Document => "Document",
            RecordKind::Block => "Block",
            RecordKind::Placement => "Placement",
            RecordKind::Attachment => "Attachment",
        }
    }

    /// Whether rows of this kind feed the derived tag index
    pub fn is_indexed(self) -> bool {
        matches!(self, RecordKind::Block)
    }

    /// Column holding the parent id for kinds ordered by an order key
    pub fn order_parent_column(self) -> Option<&'static str> {
        match self {
            RecordKind::Section | RecordKind::Document => Some("container_id"),
            RecordKind::Placement => Some("document_id"),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.record_type())
    }
}

impl FromStr for RecordKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.record_type().eq_ignore_ascii_case(s) || k.table() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Returned when a record type name matches no kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown record type '{0}'")]
pub struct UnknownKind(pub String);

/// Kind + id, enough to address a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub instance_id: String,
}

impl RecordKey {
    pub fn new(kind: RecordKind, instance_id: impl Into<String>) -> Self {
        Self {
            kind,
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.instance_id)
    }
}

/// What the conflict resolver compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub updated_at_ms: i64,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerFields {
    pub title: String,
    pub order_key: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFields {
    pub container_id: String,
    pub title: String,
    pub order_key: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFields {
    pub container_id: String,
    pub section_id: Option<String>,
    pub title: String,
    /// Domain name; blocks placed here carry the matching `domain:` tag
    pub domain: Option<String>,
    pub order_key: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockFields {
    pub body: String,
    /// Tags exactly as authored; normalized only in the derived index
    pub tags_raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementFields {
    pub block_id: String,
    pub document_id: String,
    pub order_key: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentFields {
    pub block_id: String,
    pub file_name: String,
    pub media_type: String,
    pub byte_len: Option<i64>,
}

/// Kind-specific payload of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fields {
    Container(ContainerFields),
    Section(SectionFields),
    Document(DocumentFields),
    Block(BlockFields),
    Placement(PlacementFields),
    Attachment(AttachmentFields),
}

impl Fields {
    pub fn kind(&self) -> RecordKind {
        match self {
            Fields::Container(_) => RecordKind::Container,
            Fields::Section(_) => RecordKind::Section,
            Fields::Document(_) => RecordKind::Document,
            Fields::Block(_) => RecordKind::Block,
            Fields::Placement(_) => RecordKind::Placement,
            Fields::Attachment(_) => RecordKind::Attachment,
        }
    }
}

/// A typed row: identity, version and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub instance_id: String,
    pub updated_at_ms: i64,
    pub deleted: bool,
    pub fields: Fields,
}

impl Record {
    /// Create a live record with a fresh id, stamped now
    pub fn new(fields: Fields) -> Self {
        Self {
            instance_id: new_instance_id(),
            updated_at_ms: now_ms(),
            deleted: false,
            fields,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.fields.kind()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind(), self.instance_id.clone())
    }

    pub fn version(&self) -> Version {
        Version {
            updated_at_ms: self.updated_at_ms,
            deleted: self.deleted,
        }
    }
}

/// Generate a globally unique instance id
pub fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

/// Wall-clock milliseconds since the epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
