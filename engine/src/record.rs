//! Record and change-event types shared by both stores.

use crate::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field values of a record, keyed by the owning store's field code.
pub type Fields = serde_json::Map<String, Value>;

/// One of the two record stores being kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Store A: typed entities with native and custom fields
    Crm,
    /// Store B: records with dynamically configured field groups
    Content,
}

impl Side {
    /// The other store.
    pub fn opposite(self) -> Side {
        match self {
            Side::Crm => Side::Content,
            Side::Content => Side::Crm,
        }
    }

    /// Direction of a sync whose source is this side.
    pub fn outbound(self) -> Direction {
        match self {
            Side::Crm => Direction::CrmToContent,
            Side::Content => Direction::ContentToCrm,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Crm => write!(f, "crm"),
            Side::Content => write!(f, "content"),
        }
    }
}

/// Direction a write flows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    CrmToContent,
    ContentToCrm,
}

impl Direction {
    /// Side the values are read from.
    pub fn source(self) -> Side {
        match self {
            Direction::CrmToContent => Side::Crm,
            Direction::ContentToCrm => Side::Content,
        }
    }

    /// Side the values are written to.
    pub fn target(self) -> Side {
        self.source().opposite()
    }

    pub fn reverse(self) -> Direction {
        self.target().outbound()
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::CrmToContent => 0,
            Direction::ContentToCrm => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.target())
    }
}

/// A persisted record as returned by a store adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Store-assigned identifier
    pub id: RecordId,
    /// Store-specific type (CRM contact/activity type, content post type, child entity)
    pub entity_type: String,
    /// Field values keyed by the store's field code
    pub fields: Fields,
}

impl Record {
    pub fn new(id: RecordId, entity_type: impl Into<String>, fields: Fields) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// Get a field value, treating JSON null as absent.
    pub fn get(&self, code: &str) -> Option<&Value> {
        self.fields.get(code).filter(|v| !v.is_null())
    }

    /// Read a field as an id (numbers or numeric strings).
    pub fn get_id(&self, code: &str) -> Option<RecordId> {
        self.get(code).and_then(value_as_id)
    }

    /// Read a field as a boolean flag (`1`, `"1"`, `true`).
    pub fn get_flag(&self, code: &str) -> bool {
        self.get(code).map(value_as_flag).unwrap_or(false)
    }
}

/// Interpret a JSON value as a record id.
pub fn value_as_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a JSON value as a boolean flag the way both stores encode them.
pub fn value_as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim(), "1" | "true" | "yes" | "on"),
        _ => false,
    }
}

/// Whether a value counts as empty for sync purposes.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// Delivered by a store (webhook, save hook)
    #[default]
    Store,
    /// Raised by the engine itself to refresh dependent fields
    Synthetic,
    /// Produced by a batch backfill step
    Backfill,
}

/// An inbound change notification from either store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Store the change happened in
    pub side: Side,
    /// Kind of change
    pub kind: ChangeKind,
    /// Record type; later hooks in a request may only know the raw id
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Record id in the originating store
    pub id: RecordId,
    /// Changed field values (the full record on create)
    #[serde(default)]
    pub fields: Fields,
    /// Values of the changed fields before the change
    #[serde(default)]
    pub previous: Fields,
    #[serde(default)]
    pub origin: EventOrigin,
}

impl ChangeEvent {
    pub fn new(side: Side, kind: ChangeKind, entity_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            side,
            kind,
            entity_type: Some(entity_type.into()),
            id,
            fields: Fields::new(),
            previous: Fields::new(),
            origin: EventOrigin::Store,
        }
    }

    /// An event that only carries the raw id of the record.
    pub fn bare(side: Side, kind: ChangeKind, id: RecordId) -> Self {
        Self {
            side,
            kind,
            entity_type: None,
            id,
            fields: Fields::new(),
            previous: Fields::new(),
            origin: EventOrigin::Store,
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_previous(mut self, previous: Fields) -> Self {
        self.previous = previous;
        self
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }
}
