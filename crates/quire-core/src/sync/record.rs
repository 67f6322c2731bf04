//! Conversion between remote field maps and typed records
//!
//! Remote records arrive as string-keyed JSON maps. They are checked here,
//! once, and turned into [`Record`]s; anything missing a required field or
//! naming an unknown type is rejected before it reaches the store.

use serde_json::{Map, Value};
use thiserror::Error;

use super::remote::{RecordRef, RemoteRecord};
use crate::models::{
    AttachmentFields, BlockFields, ContainerFields, DocumentFields, Fields, PlacementFields,
    Record, RecordKey, RecordKind, SectionFields,
};

/// Why a remote record could not be converted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("unknown record type '{0}'")]
    UnknownType(String),

    #[error("{record_type} '{record_name}' is missing required field '{field}'")]
    MissingField {
        record_type: String,
        record_name: String,
        field: &'static str,
    },

    #[error("{record_type} '{record_name}' field '{field}' should be {expected}")]
    WrongType {
        record_type: String,
        record_name: String,
        field: &'static str,
        expected: &'static str,
    },
}

impl TryFrom<&RemoteRecord> for Record {
    type Error = RecordError;

    fn try_from(remote: &RemoteRecord) -> Result<Self, Self::Error> {
        let kind: RecordKind = remote
            .record_type
            .parse()
            .map_err(|_| RecordError::UnknownType(remote.record_type.clone()))?;
        let r = FieldReader { remote };

        let fields = match kind {
            RecordKind::Container => Fields::Container(ContainerFields {
                title: r.string("title")?,
                order_key: r.number("order_key")?,
            }),
            RecordKind::Section => Fields::Section(SectionFields {
                container_id: r.string("container_id")?,
                title: r.string("title")?,
                order_key: r.number("order_key")?,
            }),
            RecordKind::Document => Fields::Document(DocumentFields {
                container_id: r.string("container_id")?,
                section_id: r.opt_string("section_id")?,
                title: r.string("title")?,
                domain: r.opt_string("domain")?,
                order_key: r.number("order_key")?,
            }),
            RecordKind::Block => Fields::Block(BlockFields {
                body: r.string("body")?,
                tags_raw: r.string("tags_raw")?,
            }),
            RecordKind::Placement => Fields::Placement(PlacementFields {
                block_id: r.string("block_id")?,
                document_id: r.string("document_id")?,
                order_key: r.number("order_key")?,
            }),
            RecordKind::Attachment => Fields::Attachment(AttachmentFields {
                block_id: r.string("block_id")?,
                file_name: r.string("file_name")?,
                media_type: r.string("media_type")?,
                byte_len: r.opt_integer("byte_len")?,
            }),
        };

        let instance_id = r
            .opt_string("instance_id")?
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| remote.record_name.clone());

        Ok(Record {
            instance_id,
            updated_at_ms: r.integer("updated_at_ms")?,
            deleted: r.flag("deleted")?,
            fields,
        })
    }
}

impl From<&Record> for RemoteRecord {
    fn from(record: &Record) -> Self {
        let mut fields = Map::new();
        let mut put = |name: &str, value: Value| {
            fields.insert(name.to_string(), value);
        };

        put("instance_id", Value::from(record.instance_id.as_str()));
        put("updated_at_ms", Value::from(record.updated_at_ms));
        put("deleted", Value::from(record.deleted as i64));

        match &record.fields {
            Fields::Container(f) => {
                put("title", Value::from(f.title.as_str()));
                put("order_key", Value::from(f.order_key));
            }
            Fields::Section(f) => {
                put("container_id", Value::from(f.container_id.as_str()));
                put("title", Value::from(f.title.as_str()));
                put("order_key", Value::from(f.order_key));
            }
            Fields::Document(f) => {
                put("container_id", Value::from(f.container_id.as_str()));
                put("section_id", Value::from(f.section_id.clone()));
                put("title", Value::from(f.title.as_str()));
                put("domain", Value::from(f.domain.clone()));
                put("order_key", Value::from(f.order_key));
            }
            Fields::Block(f) => {
                put("body", Value::from(f.body.as_str()));
                put("tags_raw", Value::from(f.tags_raw.as_str()));
            }
            Fields::Placement(f) => {
                put("block_id", Value::from(f.block_id.as_str()));
                put("document_id", Value::from(f.document_id.as_str()));
                put("order_key", Value::from(f.order_key));
            }
            Fields::Attachment(f) => {
                put("block_id", Value::from(f.block_id.as_str()));
                put("file_name", Value::from(f.file_name.as_str()));
                put("media_type", Value::from(f.media_type.as_str()));
                put("byte_len", Value::from(f.byte_len));
            }
        }

        RemoteRecord {
            record_type: record.kind().record_type().to_string(),
            record_name: record.instance_id.clone(),
            fields,
        }
    }
}

impl RecordRef {
    /// Local key for this reference, if the type is known
    pub fn to_key(&self) -> Option<RecordKey> {
        let kind = self.record_type.parse().ok()?;
        Some(RecordKey::new(kind, self.record_name.clone()))
    }
}

impl From<&RecordKey> for RecordRef {
    fn from(key: &RecordKey) -> Self {
        RecordRef {
            record_type: key.kind.record_type().to_string(),
            record_name: key.instance_id.clone(),
        }
    }
}

struct FieldReader<'a> {
    remote: &'a RemoteRecord,
}

impl FieldReader<'_> {
    fn get(&self, field: &'static str) -> Option<&Value> {
        self.remote.fields.get(field).filter(|v| !v.is_null())
    }

    fn missing(&self, field: &'static str) -> RecordError {
        RecordError::MissingField {
            record_type: self.remote.record_type.clone(),
            record_name: self.remote.record_name.clone(),
            field,
        }
    }

    fn wrong(&self, field: &'static str, expected: &'static str) -> RecordError {
        RecordError::WrongType {
            record_type: self.remote.record_type.clone(),
            record_name: self.remote.record_name.clone(),
            field,
            expected,
        }
    }

    fn string(&self, field: &'static str) -> Result<String, RecordError> {
        self.opt_string(field)?.ok_or_else(|| self.missing(field))
    }

    fn opt_string(&self, field: &'static str) -> Result<Option<String>, RecordError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong(field, "a string")),
        }
    }

    fn number(&self, field: &'static str) -> Result<f64, RecordError> {
        match self.get(field) {
            None => Err(self.missing(field)),
            Some(v) => v.as_f64().ok_or_else(|| self.wrong(field, "a number")),
        }
    }

    fn integer(&self, field: &'static str) -> Result<i64, RecordError> {
        self.opt_integer(field)?.ok_or_else(|| self.missing(field))
    }

    fn opt_integer(&self, field: &'static str) -> Result<Option<i64>, RecordError> {
        match self.get(field) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.wrong(field, "an integer")),
        }
    }

    /// 0/1 or a boolean; absent means live
    fn flag(&self, field: &'static str) -> Result<bool, RecordError> {
        match self.get(field) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(v) => match v.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(self.wrong(field, "0 or 1")),
            },
        }
    }
}
