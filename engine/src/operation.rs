//! Write operations issued against a store.
//!
//! The presence of an id is what turns a write into an update on both stores,
//! so the two cases are separate types: a [`CreateOp`] can never carry an id
//! and an [`UpdateOp`] can never lack one.

use crate::{
    error::Result,
    record::{value_as_id, Fields},
    Error, RecordId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field code every store uses for the primary key.
pub const ID_FIELD: &str = "id";

/// A create operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    /// Target record type
    pub entity_type: String,
    /// Initial field values, never containing an id
    fields: Fields,
}

/// An update operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOp {
    /// Target record type
    pub entity_type: String,
    /// Record to update
    pub id: RecordId,
    /// Changed field values (partial update)
    pub fields: Fields,
}

/// A delete operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOp {
    /// Target record type
    pub entity_type: String,
    /// Record to delete
    pub id: RecordId,
}

/// An operation that can be applied to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Create(CreateOp),
    Update(UpdateOp),
    Delete(DeleteOp),
}

impl Operation {
    /// Get the record type this operation targets.
    pub fn entity_type(&self) -> &str {
        match self {
            Operation::Create(op) => &op.entity_type,
            Operation::Update(op) => &op.entity_type,
            Operation::Delete(op) => &op.entity_type,
        }
    }

    /// Get the record ID this operation targets, if it has one yet.
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            Operation::Create(_) => None,
            Operation::Update(op) => Some(op.id),
            Operation::Delete(op) => Some(op.id),
        }
    }

    /// Short name used in logs and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create(_) => "create",
            Operation::Update(_) => "update",
            Operation::Delete(_) => "delete",
        }
    }
}

impl CreateOp {
    /// Create a new create operation.
    ///
    /// Fails with [`Error::UnexpectedId`] when `fields` contains an id, since
    /// the store would silently treat the write as an update.
    pub fn new(entity_type: impl Into<String>, fields: Fields) -> Result<Self> {
        let entity_type = entity_type.into();
        if let Some(id) = fields.get(ID_FIELD).filter(|v| !v.is_null()) {
            return Err(Error::UnexpectedId {
                entity_type,
                id: id.to_string(),
            });
        }
        let mut fields = fields;
        fields.remove(ID_FIELD);
        Ok(Self {
            entity_type,
            fields,
        })
    }

    /// Field values for the create call.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl UpdateOp {
    /// Create a new update operation.
    pub fn new(entity_type: impl Into<String>, id: RecordId, fields: Fields) -> Self {
        let mut fields = fields;
        fields.remove(ID_FIELD);
        Self {
            entity_type: entity_type.into(),
            id,
            fields,
        }
    }

    /// Build an update from a payload that must already contain its id.
    pub fn from_fields(entity_type: impl Into<String>, fields: Fields) -> Result<Self> {
        let entity_type = entity_type.into();
        match fields.get(ID_FIELD).and_then(value_as_id) {
            Some(id) => Ok(Self::new(entity_type, id, fields)),
            None => Err(Error::MissingId { entity_type }),
        }
    }

    /// Payload for the store call: the changed fields plus the id.
    pub fn fields_with_id(&self) -> Fields {
        let mut fields = self.fields.clone();
        fields.insert(ID_FIELD.to_string(), Value::from(self.id));
        fields
    }
}

impl DeleteOp {
    /// Create a new delete operation.
    pub fn new(entity_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}
