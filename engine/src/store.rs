//! Opaque record store interface and the in-memory reference adapter.
//!
//! The engine never talks to either store directly; it only calls
//! [`RecordStore`]. Writes made through a store raise change events the same
//! way a real store's hooks would. Instead of calling back into the
//! orchestrator, a store queues them and the orchestrator drains the queue
//! after every write with [`RecordStore::take_events`].

use crate::{
    error::Result,
    operation::{CreateOp, DeleteOp, Operation, UpdateOp},
    record::{ChangeEvent, ChangeKind, Fields, Record},
    Error, RecordId, Side,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// One page of a chunked query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Number of matching records across all pages
    pub total: usize,
    pub items: Vec<Record>,
}

/// Minimal contract of a record store.
pub trait RecordStore {
    /// Which side of the sync this store is.
    fn side(&self) -> Side;

    /// Fetch a record.
    fn get_by_id(&self, entity_type: &str, id: RecordId) -> Result<Option<Record>>;

    /// Create a record. The operation never carries an id.
    fn create(&mut self, op: &CreateOp) -> Result<Record>;

    /// Update a record. The operation always carries an id.
    fn update(&mut self, op: &UpdateOp) -> Result<Record>;

    /// Child records of `entity_type` whose `parent_field` holds `parent_id`.
    fn query_children(
        &self,
        entity_type: &str,
        parent_field: &str,
        parent_id: RecordId,
    ) -> Result<Vec<Record>>;

    /// Delete a record; `false` when it did not exist.
    fn delete(&mut self, entity_type: &str, id: RecordId) -> Result<bool>;

    /// A page of `entity_type` records matching `filter`, ordered by id.
    fn query_chunk(
        &self,
        entity_type: &str,
        filter: &Fields,
        offset: usize,
        limit: usize,
    ) -> Result<Chunk>;

    /// Type of a record known only by id.
    fn type_of(&self, _id: RecordId) -> Result<Option<String>> {
        Ok(None)
    }

    /// Drain change events raised by writes since the last call.
    fn take_events(&mut self) -> Vec<ChangeEvent> {
        Vec::new()
    }

    /// Apply an operation, returning the written record (none for deletes).
    fn apply(&mut self, op: &Operation) -> Result<Option<Record>> {
        match op {
            Operation::Create(create) => self.create(create).map(Some),
            Operation::Update(update) => self.update(update).map(Some),
            Operation::Delete(DeleteOp { entity_type, id }) => {
                self.delete(entity_type, *id)?;
                Ok(None)
            }
        }
    }
}

/// In-memory record store.
///
/// Ids come from one sequence across all types, like posts in a content
/// store or contacts in a CRM.
#[derive(Debug)]
pub struct MemoryStore {
    side: Side,
    records: BTreeMap<RecordId, Record>,
    next_id: RecordId,
    outbox: Vec<ChangeEvent>,
    failing: HashSet<(String, String)>,
    modified_field: Option<String>,
    tick: u64,
    writes: usize,
}

impl MemoryStore {
    /// Create an empty store whose ids start at `first_id`.
    pub fn new(side: Side, first_id: RecordId) -> Self {
        Self {
            side,
            records: BTreeMap::new(),
            next_id: first_id,
            outbox: Vec::new(),
            failing: HashSet::new(),
            modified_field: None,
            tick: 0,
            writes: 0,
        }
    }

    /// Stamp `field` with a fresh timestamp on every write, like a CRM's
    /// `modified_date`.
    pub fn with_modified_field(mut self, field: impl Into<String>) -> Self {
        self.modified_field = Some(field.into());
        self
    }

    /// Make every `operation` ("create", "update", "delete") on
    /// `entity_type` fail with a remote error.
    pub fn fail_on(&mut self, operation: &str, entity_type: &str) {
        self.failing
            .insert((operation.to_string(), entity_type.to_string()));
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    /// Insert a record without raising an event, keeping its id.
    pub fn seed(&mut self, record: Record) {
        self.next_id = self.next_id.max(record.id + 1);
        self.records.insert(record.id, record);
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// All records of a type, ordered by id.
    pub fn records_of(&self, entity_type: &str) -> Vec<&Record> {
        self.records
            .values()
            .filter(|r| r.entity_type == entity_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Events raised but not yet drained.
    pub fn pending_events(&self) -> &[ChangeEvent] {
        &self.outbox
    }

    fn check(&self, operation: &str, entity_type: &str) -> Result<()> {
        if self
            .failing
            .contains(&(operation.to_string(), entity_type.to_string()))
        {
            return Err(Error::remote(
                operation,
                entity_type,
                "store rejected the request",
            ));
        }
        Ok(())
    }

    fn stamp(&mut self, fields: &mut Fields) {
        if let Some(field) = &self.modified_field {
            self.tick += 1;
            let stamp = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|base| base + chrono::Duration::seconds(self.tick as i64))
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            fields.insert(field.clone(), Value::String(stamp));
        }
    }
}

impl RecordStore for MemoryStore {
    fn side(&self) -> Side {
        self.side
    }

    fn get_by_id(&self, entity_type: &str, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .records
            .get(&id)
            .filter(|r| r.entity_type == entity_type)
            .cloned())
    }

    fn create(&mut self, op: &CreateOp) -> Result<Record> {
        self.check("create", &op.entity_type)?;

        let id = self.next_id;
        self.next_id += 1;
        let mut fields: Fields = op
            .fields()
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.stamp(&mut fields);

        let record = Record::new(id, op.entity_type.clone(), fields.clone());
        self.records.insert(id, record.clone());
        self.writes += 1;
        self.outbox.push(
            ChangeEvent::new(self.side, ChangeKind::Created, op.entity_type.clone(), id)
                .with_fields(fields),
        );
        Ok(record)
    }

    fn update(&mut self, op: &UpdateOp) -> Result<Record> {
        self.check("update", &op.entity_type)?;

        let mut changes = op.fields.clone();
        self.stamp(&mut changes);

        let side = self.side;
        let record = self
            .records
            .get_mut(&op.id)
            .filter(|r| r.entity_type == op.entity_type)
            .ok_or_else(|| Error::RecordNotFound {
                side,
                entity_type: op.entity_type.clone(),
                id: op.id,
            })?;

        let mut previous = Fields::new();
        for (code, value) in &changes {
            previous.insert(
                code.clone(),
                record.fields.get(code).cloned().unwrap_or(Value::Null),
            );
            if value.is_null() {
                record.fields.remove(code);
            } else {
                record.fields.insert(code.clone(), value.clone());
            }
        }
        let updated = record.clone();

        self.writes += 1;
        self.outbox.push(
            ChangeEvent::new(side, ChangeKind::Updated, op.entity_type.clone(), op.id)
                .with_fields(changes)
                .with_previous(previous),
        );
        Ok(updated)
    }

    fn query_children(
        &self,
        entity_type: &str,
        parent_field: &str,
        parent_id: RecordId,
    ) -> Result<Vec<Record>> {
        Ok(self
            .records
            .values()
            .filter(|r| r.entity_type == entity_type && r.get_id(parent_field) == Some(parent_id))
            .cloned()
            .collect())
    }

    fn delete(&mut self, entity_type: &str, id: RecordId) -> Result<bool> {
        self.check("delete", entity_type)?;

        let exists = self
            .records
            .get(&id)
            .is_some_and(|r| r.entity_type == entity_type);
        if !exists {
            return Ok(false);
        }
        let removed = self.records.remove(&id);
        self.writes += 1;
        self.outbox.push(
            ChangeEvent::new(self.side, ChangeKind::Deleted, entity_type, id)
                .with_previous(removed.map(|r| r.fields).unwrap_or_default()),
        );
        Ok(true)
    }

    fn query_chunk(
        &self,
        entity_type: &str,
        filter: &Fields,
        offset: usize,
        limit: usize,
    ) -> Result<Chunk> {
        let matching: Vec<&Record> = self
            .records
            .values()
            .filter(|r| r.entity_type == entity_type)
            .filter(|r| filter.iter().all(|(code, value)| r.fields.get(code) == Some(value)))
            .collect();

        Ok(Chunk {
            total: matching.len(),
            items: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        })
    }

    fn type_of(&self, id: RecordId) -> Result<Option<String>> {
        Ok(self.records.get(&id).map(|r| r.entity_type.clone()))
    }

    fn take_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.outbox)
    }
}
