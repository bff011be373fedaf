//! # Tandem Engine
//!
//! Bidirectional record synchronization between a CRM (Store A) and a
//! content store (Store B).
//!
//! This crate holds the core sync logic: field mapping, value transcoding,
//! identity linking, set reconciliation and the orchestrator that drives a
//! change event from one store into the other.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine talks to stores, link storage and attachment
//!   storage only through traits ([`RecordStore`], [`LinkStore`],
//!   [`AttachmentStore`]); adapters live in the host
//! - **Explicit request state**: everything that lives for one request
//!   (recursion guard, skip flags, memo caches) is carried in a
//!   [`SyncContext`] passed down by the caller
//! - **Failures stay local**: one record failing is logged and reported,
//!   never aborts the rest of a dispatch or batch
//!
//! ## Core Concepts
//!
//! ### Mapped types
//!
//! A [`MappedType`] pairs a CRM entity/type with a Store B content type.
//! Store B fields carry a selector naming the CRM field they mirror; the
//! [`FieldMappingRegistry`] resolves selectors into a [`FieldKind`]:
//! native fields, custom fields, relationship sets or child-record families.
//!
//! ### Identity links
//!
//! The [`IdentityMap`] keeps the one-to-one links between CRM and Store B
//! records per mapped type.
//!
//! ### Reconciliation
//!
//! The [`SetReconciler`] turns desired sets (related contacts, repeater
//! rows, primary flags) into minimal create/update/delete plans.
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_engine::{
//!     ChangeEvent, ChangeKind, ContentFieldDef, ContentFieldType, EventOutcome, FieldGroup,
//!     MappedType, MappingConfig, MemoryLinkStore, MemoryStore, Orchestrator, Record, Side,
//!     SyncContext,
//! };
//! use serde_json::json;
//!
//! // 1. Map CRM individuals onto Store B "person" records
//! let config = MappingConfig::default()
//!     .with_mapped_type(MappedType::new("people", "Contact", "Individual", "person"))
//!     .with_field_group(
//!         FieldGroup::new("contact", vec!["person".into()]).with_field(
//!             ContentFieldDef::new("field_first", ContentFieldType::Text).mapped_to("first_name"),
//!         ),
//!     );
//!
//! // 2. Seed the CRM with one contact
//! let mut crm = MemoryStore::new(Side::Crm, 100);
//! crm.seed(Record::new(
//!     1,
//!     "Individual",
//!     json!({"first_name": "Ada"}).as_object().cloned().unwrap_or_default(),
//! ));
//! let content = MemoryStore::new(Side::Content, 500);
//!
//! // 3. Dispatch the CRM change
//! let mut engine = Orchestrator::new(config, crm, content, MemoryLinkStore::new()).unwrap();
//! let mut ctx = SyncContext::new();
//! let report = engine.dispatch(
//!     &mut ctx,
//!     ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", 1),
//! );
//!
//! // 4. A linked Store B record now exists
//! assert!(matches!(report.outcomes[0], EventOutcome::Created { target_id: 500, .. }));
//! assert_eq!(engine.content().get(500).unwrap().get("field_first"), Some(&json!("Ada")));
//! ```
//!
//! ## Persistence
//!
//! Use [`LinkSnapshot::capture`] and [`LinkSnapshot::restore`] to move the
//! identity links between link stores. Snapshots are serializable to JSON
//! with deterministic ordering.

pub mod attachment;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod operation;
pub mod orchestrator;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod transcode;

// Re-export main types at crate root
pub use attachment::{AttachmentId, AttachmentStore, ExportedFile, MemoryAttachments};
pub use capability::{
    AttachmentTypes, Capabilities, CapabilityProvider, CollectingSink, NotificationSink,
};
pub use config::{MappedType, MappingConfig, RelationshipTypeDef, SubRecordFamily, SyncConfig};
pub use context::{Phase, RecursionGuard, Resolve, SyncAction, SyncContext, SyncNotification};
pub use error::{Error, ErrorKind};
pub use identity::{EntityLink, IdentityMap, IdentityMemo, LinkStore, MemoryLinkStore};
pub use mapping::{
    CrmValueType, FieldKind, FieldMappingRegistry, MappedField, MappingCache, RelationshipDirection,
    Resolution, ResolvedField,
};
pub use operation::{CreateOp, DeleteOp, Operation, UpdateOp, ID_FIELD};
pub use orchestrator::{
    ChunkReport, ChunkRequest, DispatchReport, EventFailure, EventOutcome, Orchestrator,
    SkipReason,
};
pub use reconcile::{
    DesiredItem, FamilyMember, FlagTransition, IdDiffPlan, LinkedRecord, PrimaryChange,
    RelationshipPlan, RetireMode, SetReconciler,
};
pub use record::{ChangeEvent, ChangeKind, Direction, EventOrigin, Fields, Record, Side};
pub use schema::{
    ContentFieldDef, ContentFieldType, CrmDataType, CustomFieldDef, CustomFieldId, FieldGroup,
    HtmlType,
};
pub use snapshot::{LinkSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Chunk, MemoryStore, RecordStore};
pub use transcode::{ReferenceResolver, TranscodeContext, Transcoded, ValueTranscoder};

/// Type aliases for clarity
pub type RecordId = u64;
pub type MappedTypeId = String;
