//! Set reconciliation for multi-valued linked records.
//!
//! A field on one side holds a *desired* set (target ids, repeater rows);
//! the other side holds the *current* child records. Reconciling the two
//! yields the minimal set of actions to make current match desired.
//!
//! # Algorithms
//!
//! - Relationship-style records are matched by their directional
//!   (source, target) tuple, first match wins, and are deactivated rather
//!   than deleted when no longer desired.
//! - Singleton flags ("is primary") produce a [`FlagTransition`]; a whole
//!   family of flagged records is reconciled so exactly one stays set.
//! - Delete-style child records are diffed by primary key.

use crate::{
    error::Result,
    mapping::RelationshipDirection,
    operation::{CreateOp, DeleteOp, Operation, UpdateOp, ID_FIELD},
    record::{Fields, Record},
    RecordId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Field holding a relationship's type id.
pub const RELATIONSHIP_TYPE_FIELD: &str = "relationship_type_id";
/// Field holding a relationship's active flag.
pub const ACTIVE_FIELD: &str = "is_active";

/// What happens to current records nothing desires any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetireMode {
    /// Keep the record, mark it inactive
    #[default]
    Deactivate,
    /// Remove the record
    Delete,
}

/// A current relationship-style record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedRecord {
    pub id: RecordId,
    pub source_id: RecordId,
    pub target_id: RecordId,
    pub active: bool,
}

impl LinkedRecord {
    pub fn new(id: RecordId, source_id: RecordId, target_id: RecordId, active: bool) -> Self {
        Self {
            id,
            source_id,
            target_id,
            active,
        }
    }

    /// Read a relationship record as seen from one end.
    pub fn from_relationship(record: &Record, direction: RelationshipDirection) -> Option<Self> {
        Some(Self {
            id: record.id,
            source_id: record.get_id(direction.source_field())?,
            target_id: record.get_id(direction.target_field())?,
            active: record
                .get(ACTIVE_FIELD)
                .map(crate::record::value_as_flag)
                .unwrap_or(true),
        })
    }
}

/// Actions reconciling desired targets with current relationship records.
///
/// `ignore`, `activate`, `deactivate` and `delete` hold current record ids;
/// `create` holds desired target ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipPlan {
    pub ignore: Vec<RecordId>,
    pub activate: Vec<RecordId>,
    pub deactivate: Vec<RecordId>,
    pub delete: Vec<RecordId>,
    pub create: Vec<RecordId>,
}

impl RelationshipPlan {
    /// Whether the plan leaves everything as it is.
    pub fn is_noop(&self) -> bool {
        self.activate.is_empty()
            && self.deactivate.is_empty()
            && self.delete.is_empty()
            && self.create.is_empty()
    }

    /// Turn the plan into store operations on `entity_type` records.
    pub fn into_operations(
        self,
        entity_type: &str,
        type_id: u64,
        direction: RelationshipDirection,
        source_id: RecordId,
    ) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for id in self.activate {
            ops.push(Operation::Update(UpdateOp::new(
                entity_type,
                id,
                flag_fields(ACTIVE_FIELD, true),
            )));
        }
        for id in self.deactivate {
            ops.push(Operation::Update(UpdateOp::new(
                entity_type,
                id,
                flag_fields(ACTIVE_FIELD, false),
            )));
        }
        for id in self.delete {
            ops.push(Operation::Delete(DeleteOp::new(entity_type, id)));
        }
        for target in self.create {
            let mut fields = Fields::new();
            fields.insert(RELATIONSHIP_TYPE_FIELD.into(), Value::from(type_id));
            fields.insert(direction.source_field().into(), Value::from(source_id));
            fields.insert(direction.target_field().into(), Value::from(target));
            fields.insert(ACTIVE_FIELD.into(), Value::from(1));
            ops.push(Operation::Create(CreateOp::new(entity_type, fields)?));
        }
        Ok(ops)
    }
}

fn flag_fields(field: &str, on: bool) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field.to_string(), Value::from(u8::from(on)));
    fields
}

/// Change of a singleton boolean flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagTransition {
    NoOp,
    Set,
    Clear,
}

impl FlagTransition {
    pub fn from_values(previous: bool, current: bool) -> Self {
        match (previous, current) {
            (false, true) => FlagTransition::Set,
            (true, false) => FlagTransition::Clear,
            _ => FlagTransition::NoOp,
        }
    }

    /// Value to write, if any.
    pub fn target_value(self) -> Option<bool> {
        match self {
            FlagTransition::NoOp => None,
            FlagTransition::Set => Some(true),
            FlagTransition::Clear => Some(false),
        }
    }
}

/// A member of a primary-flag family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyMember {
    pub id: RecordId,
    /// Flag as currently stored
    pub previous: bool,
    /// Flag as requested by the change being synced
    pub current: bool,
}

impl FamilyMember {
    pub fn new(id: RecordId, previous: bool, current: bool) -> Self {
        Self {
            id,
            previous,
            current,
        }
    }
}

/// Transition of one family member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryChange {
    pub id: RecordId,
    pub transition: FlagTransition,
}

/// A desired delete-style child record.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredItem {
    /// Id of the record this row was synced from, if any
    pub id: Option<RecordId>,
    pub fields: Fields,
}

impl DesiredItem {
    pub fn new(id: Option<RecordId>, fields: Fields) -> Self {
        Self { id, fields }
    }
}

/// Actions reconciling desired child rows with current child records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdDiffPlan {
    /// Field sets of records to create, ids stripped
    pub create: Vec<Fields>,
    /// Changed fields of records to update
    pub update: Vec<(RecordId, Fields)>,
    pub delete: Vec<RecordId>,
    pub ignore: Vec<RecordId>,
    /// Current record each desired row was matched to, in row order
    pub matched: Vec<Option<RecordId>>,
}

impl IdDiffPlan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Turn the plan into store operations; creates get the parent reference.
    pub fn into_operations(
        self,
        entity_type: &str,
        parent_field: &str,
        parent_id: RecordId,
    ) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for id in self.delete {
            ops.push(Operation::Delete(DeleteOp::new(entity_type, id)));
        }
        for (id, fields) in self.update {
            ops.push(Operation::Update(UpdateOp::new(entity_type, id, fields)));
        }
        for mut fields in self.create {
            fields.insert(parent_field.to_string(), Value::from(parent_id));
            ops.push(Operation::Create(CreateOp::new(entity_type, fields)?));
        }
        Ok(ops)
    }
}

/// Computes reconciliation plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetReconciler {
    retire: RetireMode,
}

impl SetReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retire_mode(mut self, retire: RetireMode) -> Self {
        self.retire = retire;
        self
    }

    /// Reconcile desired target ids of `source_id` against current records.
    ///
    /// Desired entries are walked in order with duplicates dropped. Each one
    /// consumes the first unconsumed current record with the same
    /// (source, target) tuple. Unmatched desired entries are created;
    /// leftover active records are retired and leftover inactive ones ignored.
    pub fn relationships(
        &self,
        source_id: RecordId,
        desired: &[RecordId],
        current: &[LinkedRecord],
    ) -> RelationshipPlan {
        let mut plan = RelationshipPlan::default();
        let mut consumed = vec![false; current.len()];
        let mut seen = HashSet::new();

        for &target in desired {
            if !seen.insert(target) {
                continue;
            }
            let matched = current.iter().enumerate().find(|(i, record)| {
                !consumed[*i] && record.source_id == source_id && record.target_id == target
            });
            match matched {
                Some((i, record)) => {
                    consumed[i] = true;
                    if record.active {
                        plan.ignore.push(record.id);
                    } else {
                        plan.activate.push(record.id);
                    }
                }
                None => plan.create.push(target),
            }
        }

        for (record, _) in current.iter().zip(&consumed).filter(|(_, used)| !**used) {
            match (record.active, self.retire) {
                (true, RetireMode::Deactivate) => plan.deactivate.push(record.id),
                (_, RetireMode::Delete) => plan.delete.push(record.id),
                (false, RetireMode::Deactivate) => plan.ignore.push(record.id),
            }
        }

        plan
    }

    /// Transition of a single flag.
    pub fn flag(&self, previous: bool, current: bool) -> FlagTransition {
        FlagTransition::from_values(previous, current)
    }

    /// Reconcile a whole primary-flag family so exactly one member stays set.
    ///
    /// The winner is the first member newly set by this change, else the first
    /// member still set, else the first member that was not just cleared,
    /// else the first member. Every other member ends up cleared. Returns one
    /// change per member, relative to its stored flag.
    pub fn primary_family(&self, members: &[FamilyMember]) -> Vec<PrimaryChange> {
        let winner = members
            .iter()
            .find(|m| !m.previous && m.current)
            .or_else(|| members.iter().find(|m| m.current))
            .or_else(|| members.iter().find(|m| !(m.previous && !m.current)))
            .or_else(|| members.first())
            .map(|m| m.id);

        members
            .iter()
            .map(|m| PrimaryChange {
                id: m.id,
                transition: FlagTransition::from_values(m.previous, Some(m.id) == winner),
            })
            .collect()
    }

    /// Diff desired child rows against current child records by id.
    ///
    /// Rows without an id, or with an id no current record has, are created
    /// (the stale id is dropped). Current records no row names are deleted.
    /// Matching records are updated with the fields that differ, or ignored.
    pub fn diff_by_id(&self, desired: &[DesiredItem], current: &[Record]) -> IdDiffPlan {
        let mut plan = IdDiffPlan::default();
        let current_ids: HashSet<RecordId> = current.iter().map(|r| r.id).collect();
        let mut kept = HashSet::new();

        for item in desired {
            let mut fields = item.fields.clone();
            fields.remove(ID_FIELD);

            let existing = item
                .id
                .filter(|id| current_ids.contains(id) && !kept.contains(id))
                .and_then(|id| current.iter().find(|r| r.id == id));

            plan.matched.push(existing.map(|r| r.id));
            match existing {
                Some(record) => {
                    kept.insert(record.id);
                    let changed: Fields = fields
                        .into_iter()
                        .filter(|(code, value)| !same_value(record.fields.get(code), value))
                        .collect();
                    if changed.is_empty() {
                        plan.ignore.push(record.id);
                    } else {
                        plan.update.push((record.id, changed));
                    }
                }
                None => {
                    if let Some(stale) = item.id {
                        tracing::debug!(id = stale, "row refers to a missing record, creating instead");
                    }
                    plan.create.push(fields);
                }
            }
        }

        plan.delete = current
            .iter()
            .map(|r| r.id)
            .filter(|id| !kept.contains(id))
            .collect();

        plan
    }
}

/// Loose equality: stores disagree on whether ids and flags are strings.
pub(crate) fn same_value(current: Option<&Value>, desired: &Value) -> bool {
    match (current, desired) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(a), b) if a == b => true,
        (Some(Value::Null), b) => crate::record::is_empty_value(b),
        (Some(a), b) => match (scalar(a), scalar(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
