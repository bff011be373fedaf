//! Sync orchestrator.
//!
//! Routes change events from either store through
//! `Detecting -> Resolving -> Applying -> Broadcasting`:
//!
//! 1. Classify the event: child record, unmapped type, do-not-sync, delete.
//! 2. Look up the counterpart in the identity map; create it on demand.
//! 3. Resolve and transcode the mapped fields into a payload.
//! 4. Apply the payload, reconcile linked fields, write derived fields back.
//! 5. Broadcast a notification with the before/after counterpart ids.
//!
//! Every write goes through a guard on the listener chain it would trigger,
//! and the echo events the store raises while the guard is engaged are
//! dropped. [`Orchestrator::dispatch`] never returns an error: failures are
//! logged and reported per event.

use crate::{
    attachment::{AttachmentStore, MemoryAttachments},
    capability::Capabilities,
    config::{MappedType, MappingConfig},
    context::{Phase, Resolve, SyncAction, SyncContext, SyncNotification},
    error::{ErrorKind, Result},
    identity::{IdentityMap, IdentityMemo, LinkStore},
    mapping::{FieldKind, FieldMappingRegistry, MappedField, RelationshipDirection},
    operation::{CreateOp, DeleteOp, Operation, UpdateOp, ID_FIELD},
    reconcile::{
        DesiredItem, FamilyMember, LinkedRecord, RetireMode, SetReconciler,
        RELATIONSHIP_TYPE_FIELD,
    },
    record::{value_as_flag, value_as_id, ChangeEvent, ChangeKind, EventOrigin, Fields, Record},
    schema::CrmDataType,
    store::RecordStore,
    transcode::{equivalent, file_reference, ids_of, ReferenceResolver, TranscodeContext, Transcoded, ValueTranscoder},
    Direction, Error, MappedTypeId, RecordId, Side,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// CRM entity holding relationships between contacts.
pub const RELATIONSHIP_ENTITY: &str = "Relationship";

/// CRM top-level entity of contacts.
pub const CONTACT_ENTITY: &str = "Contact";

/// Why an event was not synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The record's type could not be determined
    UnknownType,
    /// The record's type takes no part in any mapping
    Unmapped,
    /// The record opted out of syncing
    DoNotSync,
    /// An earlier hook in this request already ruled the record out
    Flagged,
    /// No counterpart exists and on-demand creation is off
    NoCounterpart,
    /// A deleted record had no counterpart
    NotLinked,
}

/// What handling one event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum EventOutcome {
    #[serde(rename_all = "camelCase")]
    Created {
        mapped_type: MappedTypeId,
        source_id: RecordId,
        target_id: RecordId,
    },
    #[serde(rename_all = "camelCase")]
    Updated {
        mapped_type: MappedTypeId,
        source_id: RecordId,
        target_id: RecordId,
    },
    #[serde(rename_all = "camelCase")]
    Deleted {
        mapped_type: MappedTypeId,
        source_id: RecordId,
        target_id: RecordId,
        counterpart_deleted: bool,
    },
    /// A child record changed; the parents' mirrored fields were rebuilt
    Refreshed { parents: usize },
    /// Nothing mapped changed
    Unchanged,
    Skipped { reason: SkipReason },
    /// Raised by one of our own writes
    Suppressed,
}

impl EventOutcome {
    /// Whether the event was processed to completion.
    pub fn is_applied(&self) -> bool {
        !matches!(self, EventOutcome::Skipped { .. } | EventOutcome::Suppressed)
    }

    fn skipped(reason: SkipReason) -> Self {
        EventOutcome::Skipped { reason }
    }
}

/// An event that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    pub side: Side,
    pub id: RecordId,
    pub error: Error,
}

/// Everything one dispatch did, including follow-up events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<EventOutcome>,
    pub failures: Vec<EventFailure>,
    /// Echo events dropped by the recursion guard
    pub suppressed: usize,
    pub notifications: Vec<SyncNotification>,
}

impl DispatchReport {
    pub fn processed(&self) -> usize {
        self.outcomes.len() + self.failures.len()
    }

    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One batch step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    /// Side the records are read from
    pub side: Side,
    pub mapped_type: MappedTypeId,
    #[serde(default)]
    pub offset: usize,
    pub limit: usize,
}

/// Progress of one batch step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    /// Records in this chunk
    pub count: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Matching records across all chunks
    pub total: usize,
    /// Offset of the next chunk; `None` when done
    pub next_offset: Option<usize>,
}

/// Transcoded fields of one write, plus what needs separate handling.
#[derive(Debug, Default)]
struct Payload {
    fields: Fields,
    /// Linked fields (relationships, child families) with their raw values
    linked: Vec<(MappedField, Value)>,
    /// Store A file fields cleared by this write
    cleared_files: Vec<String>,
}

impl Payload {
    fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.linked.is_empty() && self.cleared_files.is_empty()
    }
}

/// Resolves contact ids through the identity map across every contact
/// mapped type.
struct ContactLinks<'a, L: LinkStore> {
    identity: &'a IdentityMap<L>,
    memo: &'a mut IdentityMemo,
    config: &'a MappingConfig,
}

impl<L: LinkStore> ContactLinks<'_, L> {
    fn lookup(&mut self, side: Side, id: RecordId) -> Result<Option<RecordId>> {
        for mapped in self.config.mapped_types_of_entity(CONTACT_ENTITY) {
            if let Some(found) = self.identity.get(self.memo, &mapped.id, side, id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

impl<L: LinkStore> ReferenceResolver for ContactLinks<'_, L> {
    fn content_id_for(&mut self, crm_id: RecordId) -> Result<Option<RecordId>> {
        self.lookup(Side::Crm, crm_id)
    }

    fn crm_id_for(&mut self, content_id: RecordId) -> Result<Option<RecordId>> {
        self.lookup(Side::Content, content_id)
    }
}

/// The sync orchestrator.
pub struct Orchestrator<C: RecordStore, T: RecordStore, L: LinkStore> {
    config: Arc<MappingConfig>,
    registry: FieldMappingRegistry,
    transcoder: ValueTranscoder,
    reconciler: SetReconciler,
    identity: IdentityMap<L>,
    crm: C,
    content: T,
    attachments: Box<dyn AttachmentStore + Send>,
    capabilities: Capabilities,
}

impl<C: RecordStore, T: RecordStore, L: LinkStore> std::fmt::Debug for Orchestrator<C, T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("mapped_types", &self.config.mapped_types.len())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl<C: RecordStore, T: RecordStore, L: LinkStore> Orchestrator<C, T, L> {
    /// Create an orchestrator over the two stores and a link store.
    pub fn new(config: MappingConfig, crm: C, content: T, links: L) -> Result<Self> {
        config.validate()?;
        if crm.side() != Side::Crm || content.side() != Side::Content {
            return Err(Error::InvalidConfig(
                "stores passed for the wrong sides".into(),
            ));
        }

        let config = Arc::new(config);
        Ok(Self {
            registry: FieldMappingRegistry::new(Arc::clone(&config)),
            transcoder: ValueTranscoder::new(config.sync.never_empty.clone()),
            reconciler: SetReconciler::new(),
            identity: IdentityMap::new(links),
            crm,
            content,
            attachments: Box::new(MemoryAttachments::new()),
            capabilities: Capabilities::new(),
            config,
        })
    }

    pub fn with_attachments(mut self, attachments: impl AttachmentStore + Send + 'static) -> Self {
        self.attachments = Box::new(attachments);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Delete relationships that are no longer desired instead of
    /// deactivating them.
    pub fn with_retire_mode(mut self, retire: RetireMode) -> Self {
        self.reconciler = self.reconciler.with_retire_mode(retire);
        self
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldMappingRegistry {
        &self.registry
    }

    pub fn identity(&self) -> &IdentityMap<L> {
        &self.identity
    }

    pub fn crm(&self) -> &C {
        &self.crm
    }

    pub fn crm_mut(&mut self) -> &mut C {
        &mut self.crm
    }

    pub fn content(&self) -> &T {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut T {
        &mut self.content
    }

    fn store(&self, side: Side) -> &dyn RecordStore {
        match side {
            Side::Crm => &self.crm,
            Side::Content => &self.content,
        }
    }

    fn store_mut(&mut self, side: Side) -> &mut dyn RecordStore {
        match side {
            Side::Crm => &mut self.crm,
            Side::Content => &mut self.content,
        }
    }

    /// Process an event and every follow-up event it raises.
    ///
    /// Errors never escape: each failing event is logged and recorded in the
    /// report, and processing continues with the next queued event.
    pub fn dispatch(&mut self, ctx: &mut SyncContext, event: ChangeEvent) -> DispatchReport {
        let suppressed_before = ctx.suppressed();
        let mut report = DispatchReport::default();
        ctx.queue_event(event);

        while let Some(event) = ctx.next_event() {
            let (side, id, kind) = (event.side, event.id, event.kind);
            let entity_type = event.entity_type.clone().unwrap_or_default();

            match self.handle_event(ctx, event) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    match error.kind() {
                        ErrorKind::Configuration => tracing::error!(
                            %side, id, ?kind, entity_type = %entity_type, error = %error,
                            "configuration error, record aborted"
                        ),
                        ErrorKind::Remote => tracing::error!(
                            %side, id, ?kind, entity_type = %entity_type, error = %error,
                            "remote store failed, record skipped"
                        ),
                        ErrorKind::Transcode => tracing::warn!(
                            %side, id, ?kind, entity_type = %entity_type, error = %error,
                            "transcode failed, record skipped"
                        ),
                    }
                    report.failures.push(EventFailure { side, id, error });
                }
            }
            ctx.enter(Phase::Idle);
        }

        report.suppressed = ctx.suppressed() - suppressed_before;
        report.notifications = ctx.take_notifications();
        report
    }

    /// Run one event through the pipeline.
    pub fn handle_event(&mut self, ctx: &mut SyncContext, event: ChangeEvent) -> Result<EventOutcome> {
        let span = tracing::info_span!("sync_event", side = %event.side, kind = ?event.kind, id = event.id);
        let _entered = span.enter();
        ctx.enter(Phase::Detecting);

        if event.origin != EventOrigin::Synthetic && ctx.guard.is_engaged(event.side.outbound()) {
            ctx.suppress(vec![event]);
            return Ok(EventOutcome::Suppressed);
        }
        if ctx.should_skip(event.side, event.id) {
            tracing::debug!("record already ruled out in this request");
            return Ok(EventOutcome::skipped(SkipReason::Flagged));
        }

        let known = event
            .entity_type
            .clone()
            .or_else(|| ctx.known_type(event.side, event.id).map(str::to_string));
        let entity_type = match known {
            Some(entity_type) => entity_type,
            None => match self.store(event.side).type_of(event.id)? {
                Some(entity_type) => entity_type,
                None => {
                    ctx.mark_skip(event.side, event.id);
                    return Ok(EventOutcome::skipped(SkipReason::UnknownType));
                }
            },
        };
        ctx.remember_type(event.side, event.id, &entity_type);

        let config = Arc::clone(&self.config);
        let Some(mapped) = config.mapped_type_for(event.side, &entity_type) else {
            if event.side == Side::Crm && self.is_child_type(&entity_type) {
                return self.handle_child_change(ctx, &event, &entity_type);
            }
            tracing::debug!(entity_type = %entity_type, "type is not mapped");
            ctx.mark_skip(event.side, event.id);
            return Ok(EventOutcome::skipped(SkipReason::Unmapped));
        };

        if self.flagged_do_not_sync(&event.fields) {
            ctx.mark_skip(event.side, event.id);
            return Ok(EventOutcome::skipped(SkipReason::DoNotSync));
        }

        match event.kind {
            ChangeKind::Deleted => self.handle_delete(ctx, mapped, &event),
            ChangeKind::Created | ChangeKind::Updated => self.handle_upsert(ctx, mapped, &event),
        }
    }

    fn is_child_type(&self, entity_type: &str) -> bool {
        entity_type == RELATIONSHIP_ENTITY
            || self.config.sub_record_family_for_entity(entity_type).is_some()
    }

    fn flagged_do_not_sync(&self, fields: &Fields) -> bool {
        self.config
            .sync
            .do_not_sync_field
            .as_deref()
            .and_then(|field| fields.get(field))
            .is_some_and(value_as_flag)
    }

    fn fetch(&self, side: Side, entity_type: &str, id: RecordId) -> Result<Record> {
        self.store(side)
            .get_by_id(entity_type, id)?
            .ok_or_else(|| Error::RecordNotFound {
                side,
                entity_type: entity_type.to_string(),
                id,
            })
    }

    /// Apply an operation with the listener chain it triggers suppressed.
    fn write(&mut self, ctx: &mut SyncContext, side: Side, op: &Operation) -> Result<Option<Record>> {
        let chain = side.outbound();
        ctx.guard.engage(chain)?;
        ctx.enter(Phase::Applying);

        let store = self.store_mut(side);
        let result = store.apply(op);
        let echoes = store.take_events();
        ctx.guard.release(chain);
        ctx.suppress(echoes);

        match &result {
            Ok(_) => tracing::debug!(
                %side,
                operation = op.name(),
                entity_type = op.entity_type(),
                id = ?op.record_id(),
                "write applied"
            ),
            Err(error) => tracing::error!(
                %side,
                operation = op.name(),
                entity_type = op.entity_type(),
                id = ?op.record_id(),
                params = ?op,
                error = %error,
                "write failed"
            ),
        }
        result
    }

    /// Remove the fields the target record already holds.
    ///
    /// A store's webhook for a write we made arrives in a later request, so
    /// this is what lets it settle as [`EventOutcome::Unchanged`].
    fn drop_unchanged(&self, side: Side, entity_type: &str, id: RecordId, fields: &mut Fields) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let current = self.fetch(side, entity_type, id)?;
        let before = fields.len();
        *fields = std::mem::take(fields)
            .into_iter()
            .filter(|(code, value)| !equivalent(current.fields.get(code), value))
            .collect();
        if fields.len() < before {
            tracing::debug!(%side, entity_type, id, dropped = before - fields.len(), "fields already current");
        }
        Ok(())
    }

    fn broadcast(&mut self, ctx: &mut SyncContext, notification: SyncNotification) {
        ctx.enter(Phase::Broadcasting);
        self.capabilities.broadcast(&notification);
        ctx.notify(notification);
    }

    fn handle_upsert(
        &mut self,
        ctx: &mut SyncContext,
        mapped: &MappedType,
        event: &ChangeEvent,
    ) -> Result<EventOutcome> {
        let direction = event.side.outbound();
        let target_side = direction.target();
        let counterpart = self
            .identity
            .get(&mut ctx.identity, &mapped.id, event.side, event.id)?;

        let Some(target_id) = counterpart else {
            if !self.config.sync.create_on_demand {
                tracing::debug!(mapped_type = %mapped.id, "no counterpart and on-demand creation is off");
                return Ok(EventOutcome::skipped(SkipReason::NoCounterpart));
            }
            return self.create_counterpart(ctx, mapped, event);
        };

        ctx.enter(Phase::Resolving(Resolve::Update));
        let (fields, full) = if event.fields.is_empty() {
            let source = self.fetch(event.side, mapped.type_on(event.side), event.id)?;
            if self.flagged_do_not_sync(&source.fields) {
                ctx.mark_skip(event.side, event.id);
                return Ok(EventOutcome::skipped(SkipReason::DoNotSync));
            }
            (source.fields, true)
        } else {
            (event.fields.clone(), false)
        };

        let mut payload =
            self.build_payload(ctx, direction, mapped, event.id, &fields, &event.previous, full)?;
        self.drop_unchanged(target_side, mapped.type_on(target_side), target_id, &mut payload.fields)?;
        if payload.is_empty() {
            tracing::debug!(mapped_type = %mapped.id, target_id, "no mapped field changed");
            return Ok(EventOutcome::Unchanged);
        }

        if !payload.cleared_files.is_empty() {
            self.delete_cleared_files(&mapped.crm_type, target_id, &payload.cleared_files)?;
        }
        if !payload.fields.is_empty() {
            let update = UpdateOp::new(
                mapped.type_on(target_side),
                target_id,
                std::mem::take(&mut payload.fields),
            );
            self.write(ctx, target_side, &Operation::Update(update))?;
        }
        self.finish(ctx, mapped, direction, event.id, target_id, payload)?;

        tracing::info!(mapped_type = %mapped.id, %direction, source_id = event.id, target_id, "counterpart updated");
        self.broadcast(
            ctx,
            SyncNotification {
                mapped_type: mapped.id.clone(),
                direction,
                action: SyncAction::Updated,
                source_id: event.id,
                before: Some(target_id),
                after: Some(target_id),
            },
        );
        Ok(EventOutcome::Updated {
            mapped_type: mapped.id.clone(),
            source_id: event.id,
            target_id,
        })
    }

    fn create_counterpart(
        &mut self,
        ctx: &mut SyncContext,
        mapped: &MappedType,
        event: &ChangeEvent,
    ) -> Result<EventOutcome> {
        let direction = event.side.outbound();
        let target_side = direction.target();
        ctx.enter(Phase::Resolving(Resolve::Create));

        let source = self.fetch(event.side, mapped.type_on(event.side), event.id)?;
        if self.flagged_do_not_sync(&source.fields) {
            ctx.mark_skip(event.side, event.id);
            return Ok(EventOutcome::skipped(SkipReason::DoNotSync));
        }

        let mut payload =
            self.build_payload(ctx, direction, mapped, event.id, &source.fields, &Fields::new(), true)?;
        let create = CreateOp::new(mapped.type_on(target_side), std::mem::take(&mut payload.fields))?;
        let target_type = create.entity_type.clone();
        let created = self
            .write(ctx, target_side, &Operation::Create(create))?
            .ok_or_else(|| Error::remote("create", target_type, "store returned no record"))?;

        let (crm_id, content_id) = match event.side {
            Side::Crm => (event.id, created.id),
            Side::Content => (created.id, event.id),
        };
        if let Err(error) = self
            .identity
            .set(&mut ctx.identity, &mapped.id, crm_id, content_id)
        {
            // no counterpart may outlive a failed link
            let delete = DeleteOp::new(mapped.type_on(target_side), created.id);
            if let Err(cleanup) = self.write(ctx, target_side, &Operation::Delete(delete)) {
                tracing::error!(mapped_type = %mapped.id, target_id = created.id, error = %cleanup, "orphaned counterpart not removed");
            }
            return Err(error);
        }
        self.finish(ctx, mapped, direction, event.id, created.id, payload)?;

        tracing::info!(mapped_type = %mapped.id, %direction, source_id = event.id, target_id = created.id, "counterpart created");
        self.broadcast(
            ctx,
            SyncNotification {
                mapped_type: mapped.id.clone(),
                direction,
                action: SyncAction::Created,
                source_id: event.id,
                before: None,
                after: Some(created.id),
            },
        );
        Ok(EventOutcome::Created {
            mapped_type: mapped.id.clone(),
            source_id: event.id,
            target_id: created.id,
        })
    }

    fn handle_delete(
        &mut self,
        ctx: &mut SyncContext,
        mapped: &MappedType,
        event: &ChangeEvent,
    ) -> Result<EventOutcome> {
        let direction = event.side.outbound();
        let target_side = direction.target();
        let Some(target_id) = self
            .identity
            .get(&mut ctx.identity, &mapped.id, event.side, event.id)?
        else {
            return Ok(EventOutcome::skipped(SkipReason::NotLinked));
        };

        let delete_counterpart = self.config.sync.delete_counterparts;
        if delete_counterpart {
            let delete = DeleteOp::new(mapped.type_on(target_side), target_id);
            self.write(ctx, target_side, &Operation::Delete(delete))?;
        }
        self.identity
            .remove(&mut ctx.identity, &mapped.id, event.side, event.id)?;

        tracing::info!(mapped_type = %mapped.id, %direction, source_id = event.id, target_id, delete_counterpart, "linked record deleted");
        self.broadcast(
            ctx,
            SyncNotification {
                mapped_type: mapped.id.clone(),
                direction,
                action: SyncAction::Deleted,
                source_id: event.id,
                before: Some(target_id),
                after: (!delete_counterpart).then_some(target_id),
            },
        );
        Ok(EventOutcome::Deleted {
            mapped_type: mapped.id.clone(),
            source_id: event.id,
            target_id,
            counterpart_deleted: delete_counterpart,
        })
    }

    /// Rebuild the mirrored fields of the contacts a child record belongs to.
    fn handle_child_change(
        &mut self,
        ctx: &mut SyncContext,
        event: &ChangeEvent,
        entity_type: &str,
    ) -> Result<EventOutcome> {
        let fields = match self.crm.get_by_id(entity_type, event.id)? {
            Some(record) => record.fields,
            None => {
                let mut fields = event.previous.clone();
                fields.extend(event.fields.clone());
                fields
            }
        };

        let mut parents = Vec::new();
        if entity_type == RELATIONSHIP_ENTITY {
            let Some(type_id) = fields.get(RELATIONSHIP_TYPE_FIELD).and_then(value_as_id) else {
                return Ok(EventOutcome::Refreshed { parents: 0 });
            };
            for direction in [
                RelationshipDirection::AToB,
                RelationshipDirection::BToA,
            ] {
                if let Some(contact) = fields.get(direction.source_field()).and_then(value_as_id) {
                    parents.push((contact, FieldKind::Relationship { type_id, direction }));
                }
            }
        } else if let Some(family) = self.config.sub_record_family_for_entity(entity_type) {
            if let Some(parent) = fields.get(&family.parent_field).and_then(value_as_id) {
                parents.push((parent, FieldKind::SubRecords(family.selector.clone())));
            }
        }

        let mut refreshed = 0;
        for (crm_id, kind) in parents {
            refreshed += self.refresh_linked_fields(ctx, crm_id, Some(&kind))?;
        }
        Ok(EventOutcome::Refreshed { parents: refreshed })
    }

    /// Resolve and transcode the fields of a source record into a payload.
    ///
    /// `full` means `fields` is the whole record rather than a change set;
    /// linked Store B fields are then rebuilt from the CRM child records.
    #[allow(clippy::too_many_arguments)]
    fn build_payload(
        &mut self,
        ctx: &mut SyncContext,
        direction: Direction,
        mapped: &MappedType,
        source_id: RecordId,
        fields: &Fields,
        previous: &Fields,
        full: bool,
    ) -> Result<Payload> {
        let Self {
            config,
            registry,
            transcoder,
            identity,
            attachments,
            capabilities,
            ..
        } = self;
        let config: &MappingConfig = config;
        let identity: &IdentityMap<L> = identity;

        let content_fields = registry.content_fields(&mut ctx.mapping, mapped);
        let skip_field = config.sync.do_not_sync_field.as_deref();
        let attachments_supported = capabilities.supports_attachments(&mapped.crm_type);

        let mut payload = Payload::default();
        let mut rebuild = Vec::new();
        {
            let mut references = ContactLinks {
                identity,
                memo: &mut ctx.identity,
                config,
            };
            let mut tctx = TranscodeContext::new(attachments.as_mut(), &mut references);

            for field in content_fields.iter() {
                if Some(field.def.key.as_str()) == skip_field {
                    continue;
                }
                if field.resolved.value_type.data_type == CrmDataType::File && !attachments_supported {
                    tracing::debug!(field = %field.def.key, crm_type = %mapped.crm_type, "type holds no attachments, field skipped");
                    continue;
                }

                let (code, result) = match direction {
                    Direction::ContentToCrm => {
                        let Some(value) = fields.get(&field.def.key) else {
                            continue;
                        };
                        if field.resolved.kind.is_linked() {
                            payload.linked.push((field.clone(), value.clone()));
                            continue;
                        }
                        let Some(code) = field.resolved.write_code() else {
                            continue;
                        };
                        let previous = previous.get(&field.def.key);
                        (code, transcoder.to_crm(&mut tctx, field, value, previous))
                    }
                    Direction::CrmToContent => {
                        if field.resolved.kind.is_linked() {
                            if full {
                                rebuild.push(field.clone());
                            }
                            continue;
                        }
                        let Some(value) = field.resolved.kind.code().and_then(|c| fields.get(&c)) else {
                            continue;
                        };
                        (field.def.key.clone(), transcoder.to_content(&mut tctx, field, value))
                    }
                };

                match result {
                    Ok(Transcoded::Value(value)) => {
                        payload.fields.insert(code, value);
                    }
                    Ok(Transcoded::Omit) => {}
                    Err(error) if error.kind() == ErrorKind::Transcode => {
                        tracing::warn!(field = %field.def.key, %direction, error = %error, "value not transcoded, field omitted");
                    }
                    Err(error) => return Err(error),
                }
            }
            payload.cleared_files = std::mem::take(&mut tctx.cleared_files);
        }

        for field in rebuild {
            let value = self.linked_value_for_content(ctx, source_id, &field)?;
            payload.fields.insert(field.def.key.clone(), value);
        }
        Ok(payload)
    }

    /// Post-write steps: linked fields, derived write-back, synthetic events.
    fn finish(
        &mut self,
        ctx: &mut SyncContext,
        mapped: &MappedType,
        direction: Direction,
        source_id: RecordId,
        target_id: RecordId,
        payload: Payload,
    ) -> Result<()> {
        if direction != Direction::ContentToCrm {
            return Ok(());
        }

        let mut generated_ids = false;
        for (field, value) in &payload.linked {
            generated_ids |= self.apply_linked_to_crm(ctx, target_id, field, value)?;
        }
        self.write_back(ctx, mapped, target_id, source_id, generated_ids)?;

        if !payload.cleared_files.is_empty() {
            let cleared: Fields = payload
                .cleared_files
                .iter()
                .map(|code| (code.clone(), Value::Null))
                .collect();
            ctx.queue_event(
                ChangeEvent::new(Side::Crm, ChangeKind::Updated, mapped.crm_type.clone(), target_id)
                    .with_fields(cleared)
                    .with_origin(EventOrigin::Synthetic),
            );
        }
        Ok(())
    }

    fn delete_cleared_files(&mut self, crm_type: &str, crm_id: RecordId, codes: &[String]) -> Result<()> {
        let record = self.fetch(Side::Crm, crm_type, crm_id)?;
        for code in codes {
            let Some(reference) = record.get(code).and_then(file_reference) else {
                continue;
            };
            let deleted = self.attachments.delete_crm_file(&reference)?;
            tracing::debug!(code = %code, reference = %reference, deleted, "cleared file removed from crm");
        }
        Ok(())
    }

    /// Write the CRM's derived fields (and regenerated child ids) back onto
    /// the Store B record.
    fn write_back(
        &mut self,
        ctx: &mut SyncContext,
        mapped: &MappedType,
        crm_id: RecordId,
        content_id: RecordId,
        children: bool,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        if config.sync.derived_fields.is_empty() && !children {
            return Ok(());
        }

        let mut derived: Vec<MappedField> = Vec::new();
        for code in &config.sync.derived_fields {
            derived.extend(self.registry.fields_for_crm_code(&mut ctx.mapping, mapped, code));
        }
        if children {
            derived.extend(
                self.registry
                    .content_fields(&mut ctx.mapping, mapped)
                    .iter()
                    .filter(|f| matches!(f.resolved.kind, FieldKind::SubRecords(_)))
                    .cloned(),
            );
        }
        if derived.is_empty() {
            return Ok(());
        }

        let record = self.fetch(Side::Crm, &mapped.crm_type, crm_id)?;
        let mut fields = Fields::new();
        for field in &derived {
            if field.resolved.kind.is_linked() {
                let value = self.linked_value_for_content(ctx, crm_id, field)?;
                fields.insert(field.def.key.clone(), value);
                continue;
            }
            let Some(value) = field.resolved.kind.code().and_then(|c| record.fields.get(&c).cloned()) else {
                continue;
            };
            let mut references = ContactLinks {
                identity: &self.identity,
                memo: &mut ctx.identity,
                config: &config,
            };
            let mut tctx = TranscodeContext::new(self.attachments.as_mut(), &mut references);
            match self.transcoder.to_content(&mut tctx, field, &value) {
                Ok(Transcoded::Value(value)) => {
                    fields.insert(field.def.key.clone(), value);
                }
                Ok(Transcoded::Omit) => {}
                Err(error) => {
                    tracing::warn!(field = %field.def.key, error = %error, "derived value not transcoded");
                }
            }
        }
        self.drop_unchanged(Side::Content, &mapped.content_type, content_id, &mut fields)?;
        if fields.is_empty() {
            return Ok(());
        }

        let update = UpdateOp::new(mapped.content_type.clone(), content_id, fields);
        self.write(ctx, Side::Content, &Operation::Update(update))?;
        tracing::debug!(mapped_type = %mapped.id, content_id, "derived fields written back");
        Ok(())
    }

    fn contact_crm_id(&mut self, ctx: &mut SyncContext, content_id: RecordId) -> Result<Option<RecordId>> {
        ContactLinks {
            identity: &self.identity,
            memo: &mut ctx.identity,
            config: &self.config,
        }
        .crm_id_for(content_id)
    }

    fn contact_content_id(&mut self, ctx: &mut SyncContext, crm_id: RecordId) -> Result<Option<RecordId>> {
        ContactLinks {
            identity: &self.identity,
            memo: &mut ctx.identity,
            config: &self.config,
        }
        .content_id_for(crm_id)
    }

    fn relationships_of(
        &self,
        crm_id: RecordId,
        type_id: u64,
        direction: RelationshipDirection,
    ) -> Result<Vec<LinkedRecord>> {
        Ok(self
            .crm
            .query_children(RELATIONSHIP_ENTITY, direction.source_field(), crm_id)?
            .iter()
            .filter(|r| r.get_id(RELATIONSHIP_TYPE_FIELD) == Some(type_id))
            .filter_map(|r| LinkedRecord::from_relationship(r, direction))
            .collect())
    }

    /// Reconcile a linked Store B field onto the CRM record `crm_id`.
    ///
    /// Returns whether child records were created (their new ids then need
    /// writing back).
    fn apply_linked_to_crm(
        &mut self,
        ctx: &mut SyncContext,
        crm_id: RecordId,
        field: &MappedField,
        value: &Value,
    ) -> Result<bool> {
        match &field.resolved.kind {
            FieldKind::Relationship { type_id, direction } => {
                let mut desired = Vec::new();
                for content_id in ids_of(value) {
                    match self.contact_crm_id(ctx, content_id)? {
                        Some(id) => desired.push(id),
                        None => tracing::debug!(content_id, "related record is not linked, skipped"),
                    }
                }
                let current = self.relationships_of(crm_id, *type_id, *direction)?;
                let plan = self.reconciler.relationships(crm_id, &desired, &current);
                if plan.is_noop() {
                    return Ok(false);
                }
                tracing::debug!(field = %field.def.key, ?plan, "relationship plan");

                let mut affected: Vec<RecordId> = plan.create.clone();
                affected.extend(
                    current
                        .iter()
                        .filter(|r| {
                            plan.activate.contains(&r.id)
                                || plan.deactivate.contains(&r.id)
                                || plan.delete.contains(&r.id)
                        })
                        .map(|r| r.target_id),
                );

                for op in plan.into_operations(RELATIONSHIP_ENTITY, *type_id, *direction, crm_id)? {
                    self.write(ctx, Side::Crm, &op)?;
                }

                // The far ends mirror the same relationships on their own field
                let mirror = FieldKind::Relationship {
                    type_id: *type_id,
                    direction: direction.reverse(),
                };
                for target in affected {
                    self.refresh_linked_fields(ctx, target, Some(&mirror))?;
                }
                Ok(false)
            }
            FieldKind::SubRecords(selector) => {
                let config = Arc::clone(&self.config);
                let Some(family) = config.sub_record_family(selector) else {
                    return Ok(false);
                };

                let rows: Vec<&Fields> = match value {
                    Value::Array(rows) => rows.iter().filter_map(Value::as_object).collect(),
                    _ => Vec::new(),
                };
                let mut desired = Vec::with_capacity(rows.len());
                let mut wants_primary = Vec::with_capacity(rows.len());
                for row in rows {
                    let (item, primary) = row_to_child(row, field, family.primary_field.as_deref());
                    desired.push(item);
                    wants_primary.push(primary);
                }

                let current = self
                    .crm
                    .query_children(&family.entity_type, &family.parent_field, crm_id)?;
                let plan = self.reconciler.diff_by_id(&desired, &current);
                let mut row_ids = plan.matched.clone();
                if !plan.is_noop() {
                    tracing::debug!(field = %field.def.key, create = plan.create.len(), update = plan.update.len(), delete = plan.delete.len(), "child record plan");
                }

                let mut created = Vec::new();
                for op in plan.into_operations(&family.entity_type, &family.parent_field, crm_id)? {
                    let written = self.write(ctx, Side::Crm, &op)?;
                    if let (Operation::Create(_), Some(record)) = (&op, written) {
                        created.push(record.id);
                    }
                }
                let mut fresh = created.iter().copied();
                for slot in row_ids.iter_mut().filter(|slot| slot.is_none()) {
                    *slot = fresh.next();
                }

                if let Some(primary_field) = family.primary_field.as_deref() {
                    let members: Vec<FamilyMember> = row_ids
                        .iter()
                        .zip(&wants_primary)
                        .filter_map(|(id, wants)| {
                            let id = (*id)?;
                            let stored = current
                                .iter()
                                .find(|r| r.id == id)
                                .is_some_and(|r| r.get_flag(primary_field));
                            Some(FamilyMember::new(id, stored, *wants))
                        })
                        .collect();

                    let mut changes = self.reconciler.primary_family(&members);
                    // Clear before set so the store never sees two primaries
                    changes.sort_by_key(|c| c.transition.target_value() == Some(true));
                    for change in changes {
                        let Some(on) = change.transition.target_value() else {
                            continue;
                        };
                        let mut flag = Fields::new();
                        flag.insert(primary_field.to_string(), Value::from(u8::from(on)));
                        let update = UpdateOp::new(family.entity_type.clone(), change.id, flag);
                        self.write(ctx, Side::Crm, &Operation::Update(update))?;
                    }
                }
                Ok(!created.is_empty())
            }
            FieldKind::Native(_) | FieldKind::Custom(_) => Ok(false),
        }
    }

    /// Current value of a linked Store B field, built from CRM child records.
    fn linked_value_for_content(
        &mut self,
        ctx: &mut SyncContext,
        crm_id: RecordId,
        field: &MappedField,
    ) -> Result<Value> {
        match &field.resolved.kind {
            FieldKind::Relationship { type_id, direction } => {
                let mut ids = Vec::new();
                for relationship in self.relationships_of(crm_id, *type_id, *direction)? {
                    if !relationship.active {
                        continue;
                    }
                    if let Some(content_id) = self.contact_content_id(ctx, relationship.target_id)? {
                        ids.push(Value::from(content_id));
                    }
                }
                Ok(Value::Array(ids))
            }
            FieldKind::SubRecords(selector) => {
                let config = Arc::clone(&self.config);
                let Some(family) = config.sub_record_family(selector) else {
                    return Ok(Value::Array(Vec::new()));
                };
                let children = self
                    .crm
                    .query_children(&family.entity_type, &family.parent_field, crm_id)?;
                Ok(Value::Array(
                    children
                        .iter()
                        .map(|child| Value::Object(child_to_row(child, field, family.primary_field.as_deref())))
                        .collect(),
                ))
            }
            FieldKind::Native(_) | FieldKind::Custom(_) => Ok(Value::Null),
        }
    }

    /// Rebuild linked Store B fields of the contact `crm_id`.
    ///
    /// With `kind` set only fields of that kind are rebuilt. Returns the
    /// number of Store B records written (0 when the contact is not linked or
    /// already current).
    fn refresh_linked_fields(
        &mut self,
        ctx: &mut SyncContext,
        crm_id: RecordId,
        kind: Option<&FieldKind>,
    ) -> Result<usize> {
        let config = Arc::clone(&self.config);
        let mut refreshed = 0;
        for mapped in config.mapped_types_of_entity(CONTACT_ENTITY) {
            let Some(content_id) = self
                .identity
                .get(&mut ctx.identity, &mapped.id, Side::Crm, crm_id)?
            else {
                continue;
            };

            let fields: Vec<MappedField> = match kind {
                Some(kind) => self.registry.fields_for_kind(&mut ctx.mapping, mapped, kind),
                None => self
                    .registry
                    .content_fields(&mut ctx.mapping, mapped)
                    .iter()
                    .filter(|f| f.resolved.kind.is_linked())
                    .cloned()
                    .collect(),
            };
            if fields.is_empty() {
                continue;
            }

            let mut payload = Fields::new();
            for field in &fields {
                let value = self.linked_value_for_content(ctx, crm_id, field)?;
                payload.insert(field.def.key.clone(), value);
            }
            self.drop_unchanged(Side::Content, &mapped.content_type, content_id, &mut payload)?;
            if payload.is_empty() {
                continue;
            }
            let update = UpdateOp::new(mapped.content_type.clone(), content_id, payload);
            self.write(ctx, Side::Content, &Operation::Update(update))?;
            tracing::debug!(mapped_type = %mapped.id, crm_id, content_id, "linked fields refreshed");
            refreshed += 1;
        }
        Ok(refreshed)
    }

    /// Run one batch step.
    ///
    /// Reads one page of the mapped type from `request.side` through the
    /// store's own pagination and syncs each record as a full refresh.
    pub fn sync_chunk(&mut self, ctx: &mut SyncContext, request: &ChunkRequest) -> Result<ChunkReport> {
        let config = Arc::clone(&self.config);
        let mapped = config
            .mapped_type(&request.mapped_type)
            .ok_or_else(|| Error::UnknownMappedType(request.mapped_type.clone()))?;
        let limit = request.limit.clamp(1, config.sync.max_chunk);
        let entity_type = mapped.type_on(request.side);

        let chunk = self
            .store(request.side)
            .query_chunk(entity_type, &Fields::new(), request.offset, limit)?;

        let mut report = ChunkReport {
            count: chunk.items.len(),
            total: chunk.total,
            ..Default::default()
        };
        for item in chunk.items {
            let event = ChangeEvent::new(request.side, ChangeKind::Updated, entity_type, item.id)
                .with_origin(EventOrigin::Backfill);
            let dispatched = self.dispatch(ctx, event);
            report.failed += dispatched.failures.len();
            for outcome in &dispatched.outcomes {
                match outcome {
                    EventOutcome::Skipped { .. } => report.skipped += 1,
                    other if other.is_applied() => report.applied += 1,
                    _ => {}
                }
            }
        }

        let end = request.offset + report.count;
        report.next_offset = (report.count > 0 && end < report.total).then_some(end);
        tracing::info!(
            mapped_type = %mapped.id,
            side = %request.side,
            offset = request.offset,
            count = report.count,
            applied = report.applied,
            failed = report.failed,
            total = report.total,
            "chunk synced"
        );
        Ok(report)
    }
}

/// Split a repeater row into child fields, its id and its primary flag.
fn row_to_child(row: &Fields, field: &MappedField, primary_field: Option<&str>) -> (DesiredItem, bool) {
    let columns: Vec<(String, String)> = if field.def.sub_fields.is_empty() {
        row.keys().map(|k| (k.clone(), k.clone())).collect()
    } else {
        field
            .def
            .sub_fields
            .iter()
            .map(|sub| (sub.key.clone(), sub.selector.clone().unwrap_or_else(|| sub.key.clone())))
            .collect()
    };

    let mut id = None;
    let mut primary = false;
    let mut fields = Fields::new();
    for (key, code) in columns {
        let value = row.get(&key).cloned().unwrap_or(Value::Null);
        if code == ID_FIELD {
            id = value_as_id(&value);
        } else if Some(code.as_str()) == primary_field {
            primary = value_as_flag(&value);
        } else {
            fields.insert(code, value);
        }
    }
    (DesiredItem::new(id, fields), primary)
}

/// Render a CRM child record as a repeater row.
fn child_to_row(child: &Record, field: &MappedField, primary_field: Option<&str>) -> Fields {
    if field.def.sub_fields.is_empty() {
        let mut row = child.fields.clone();
        row.insert(ID_FIELD.to_string(), Value::from(child.id));
        return row;
    }

    field
        .def
        .sub_fields
        .iter()
        .map(|sub| {
            let code = sub.selector.as_deref().unwrap_or(&sub.key);
            let value = if code == ID_FIELD {
                Value::from(child.id)
            } else if Some(code) == primary_field {
                Value::Bool(child.get_flag(code))
            } else {
                child.fields.get(code).cloned().unwrap_or(Value::Null)
            };
            (sub.key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ContentFieldDef, ContentFieldType};
    use crate::mapping::{CrmValueType, ResolvedField};
    use serde_json::json;

    fn phones_field() -> MappedField {
        let def = ContentFieldDef::new("phones", ContentFieldType::Repeater)
            .mapped_to("phones")
            .with_sub_field(ContentFieldDef::new("row_id", ContentFieldType::Text).mapped_to("id"))
            .with_sub_field(ContentFieldDef::new("number", ContentFieldType::Text).mapped_to("phone"))
            .with_sub_field(ContentFieldDef::new("main", ContentFieldType::TrueFalse).mapped_to("is_primary"));
        MappedField {
            def,
            resolved: ResolvedField {
                kind: FieldKind::SubRecords("phones".into()),
                value_type: CrmValueType::new(CrmDataType::String),
            },
        }
    }

    #[test]
    fn repeater_row_splits_into_child_fields() {
        let row = json!({"row_id": "7", "number": "555", "main": true});
        let (item, primary) = row_to_child(row.as_object().unwrap(), &phones_field(), Some("is_primary"));

        assert_eq!(item.id, Some(7));
        assert!(primary);
        assert_eq!(item.fields.get("phone"), Some(&json!("555")));
        assert!(!item.fields.contains_key("is_primary"));
    }

    #[test]
    fn child_record_renders_as_row() {
        let child = Record::new(
            7,
            "Phone",
            json!({"phone": "555", "is_primary": "1", "contact_id": 3})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let row = child_to_row(&child, &phones_field(), Some("is_primary"));

        assert_eq!(row.get("row_id"), Some(&json!(7)));
        assert_eq!(row.get("main"), Some(&json!(true)));
        assert!(!row.contains_key("contact_id"));
    }

    #[test]
    fn skipped_and_suppressed_are_not_applied() {
        assert!(!EventOutcome::Suppressed.is_applied());
        assert!(!EventOutcome::skipped(SkipReason::Unmapped).is_applied());
        assert!(EventOutcome::Unchanged.is_applied());
        assert!(EventOutcome::Refreshed { parents: 0 }.is_applied());
    }

    #[test]
    fn outcomes_serialize_tagged() {
        let outcome = EventOutcome::Created {
            mapped_type: "people".into(),
            source_id: 1,
            target_id: 2,
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"outcome": "created", "mappedType": "people", "sourceId": 1, "targetId": 2})
        );
        assert_eq!(
            serde_json::to_value(EventOutcome::skipped(SkipReason::DoNotSync)).unwrap(),
            json!({"outcome": "skipped", "reason": "doNotSync"})
        );
    }
}
