//! Per-request sync context.
//!
//! Everything that lives for exactly one logical request is kept here and
//! passed down explicitly: the recursion guard, do-not-sync flags, memo
//! caches, queued follow-up events and the notifications raised so far.

use crate::{
    error::Result,
    identity::IdentityMemo,
    mapping::MappingCache,
    record::ChangeEvent,
    Direction, Error, MappedTypeId, RecordId, Side,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Whether a resolved write creates or updates the counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolve {
    Create,
    Update,
}

/// Pipeline state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Detecting,
    Resolving(Resolve),
    Applying,
    Broadcasting,
}

/// Non-reentrant suppression of one direction's listener chain.
#[derive(Debug, Clone, Default)]
pub struct RecursionGuard {
    engaged: [bool; 2],
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress `direction`. Engaging an engaged guard is an error.
    pub fn engage(&mut self, direction: Direction) -> Result<()> {
        let slot = &mut self.engaged[direction.index()];
        if *slot {
            return Err(Error::GuardReentered(direction.to_string()));
        }
        *slot = true;
        Ok(())
    }

    pub fn release(&mut self, direction: Direction) {
        self.engaged[direction.index()] = false;
    }

    pub fn is_engaged(&self, direction: Direction) -> bool {
        self.engaged[direction.index()]
    }
}

/// What an applied sync did to the counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
}

/// Broadcast after a sync has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotification {
    pub mapped_type: MappedTypeId,
    pub direction: Direction,
    pub action: SyncAction,
    /// Record the change came from
    pub source_id: RecordId,
    /// Counterpart id before the sync
    pub before: Option<RecordId>,
    /// Counterpart id after the sync
    pub after: Option<RecordId>,
}

/// State of one logical request.
#[derive(Debug, Default)]
pub struct SyncContext {
    pub guard: RecursionGuard,
    pub mapping: MappingCache,
    pub identity: IdentityMemo,
    skip: HashSet<(Side, RecordId)>,
    known_types: HashMap<(Side, RecordId), String>,
    queue: VecDeque<ChangeEvent>,
    notifications: Vec<SyncNotification>,
    trace: Vec<Phase>,
    suppressed: usize,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that a record must not be synced for the rest of the request.
    pub fn mark_skip(&mut self, side: Side, id: RecordId) {
        if self.skip.insert((side, id)) {
            tracing::debug!(%side, id, "record flagged do-not-sync for this request");
        }
    }

    pub fn should_skip(&self, side: Side, id: RecordId) -> bool {
        self.skip.contains(&(side, id))
    }

    pub fn remember_type(&mut self, side: Side, id: RecordId, entity_type: &str) {
        self.known_types
            .entry((side, id))
            .or_insert_with(|| entity_type.to_string());
    }

    pub fn known_type(&self, side: Side, id: RecordId) -> Option<&str> {
        self.known_types.get(&(side, id)).map(String::as_str)
    }

    /// Queue a follow-up event for this request.
    pub fn queue_event(&mut self, event: ChangeEvent) {
        self.queue.push_back(event);
    }

    pub fn next_event(&mut self) -> Option<ChangeEvent> {
        self.queue.pop_front()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn notify(&mut self, notification: SyncNotification) {
        self.notifications.push(notification);
    }

    pub fn notifications(&self) -> &[SyncNotification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<SyncNotification> {
        std::mem::take(&mut self.notifications)
    }

    /// Move to a new pipeline phase.
    pub fn enter(&mut self, phase: Phase) {
        if self.trace.last() != Some(&phase) {
            tracing::trace!(?phase, "phase");
            self.trace.push(phase);
        }
    }

    /// Current pipeline phase.
    pub fn phase(&self) -> Phase {
        self.trace.last().copied().unwrap_or(Phase::Idle)
    }

    /// Every phase entered so far, in order.
    pub fn trace(&self) -> &[Phase] {
        &self.trace
    }

    /// Drop store echoes raised while a guard was engaged.
    pub fn suppress(&mut self, echoes: Vec<ChangeEvent>) {
        for echo in &echoes {
            tracing::trace!(side = %echo.side, id = echo.id, kind = ?echo.kind, "echo suppressed");
        }
        self.suppressed += echoes.len();
    }

    /// Number of echoes suppressed so far.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }
}
