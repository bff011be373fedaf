//! Field mapping registry.
//!
//! A Store B field carries a selector naming the Store A field it mirrors.
//! The registry turns that selector into a [`FieldKind`] exactly once, so no
//! code downstream ever re-parses field codes. Custom field membership is
//! checked before the native allow-lists because a native code and a custom
//! code can collide as raw strings.
//!
//! Lookups that scan configuration are memoized in a [`MappingCache`] owned by
//! the per-request [`crate::SyncContext`].

use crate::{
    config::{MappedType, MappingConfig},
    schema::{
        ContentFieldDef, CrmDataType, CustomFieldDef, CustomFieldId, CUSTOM_FIELD_PREFIX,
    },
    MappedTypeId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which end of a relationship the synced record sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipDirection {
    /// Record is contact `a`, mirrored ids are the `b` ends
    #[serde(rename = "ab")]
    AToB,
    /// Record is contact `b`, mirrored ids are the `a` ends
    #[serde(rename = "ba")]
    BToA,
}

impl RelationshipDirection {
    /// Relationship field holding the synced record's id.
    pub fn source_field(self) -> &'static str {
        match self {
            RelationshipDirection::AToB => "contact_id_a",
            RelationshipDirection::BToA => "contact_id_b",
        }
    }

    /// Relationship field holding the mirrored target id.
    pub fn target_field(self) -> &'static str {
        match self {
            RelationshipDirection::AToB => "contact_id_b",
            RelationshipDirection::BToA => "contact_id_a",
        }
    }

    /// The same relationship seen from the other end.
    pub fn reverse(self) -> Self {
        match self {
            RelationshipDirection::AToB => RelationshipDirection::BToA,
            RelationshipDirection::BToA => RelationshipDirection::AToB,
        }
    }

    fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "ab" => Some(RelationshipDirection::AToB),
            "ba" => Some(RelationshipDirection::BToA),
            _ => None,
        }
    }
}

impl fmt::Display for RelationshipDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipDirection::AToB => write!(f, "ab"),
            RelationshipDirection::BToA => write!(f, "ba"),
        }
    }
}

/// What a selector resolves to on the CRM side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A native field, by API code
    Native(String),
    /// A custom field, by id
    Custom(CustomFieldId),
    /// The set of contacts related through a relationship type
    Relationship {
        type_id: u64,
        direction: RelationshipDirection,
    },
    /// A family of child records, by family selector
    SubRecords(String),
}

impl FieldKind {
    /// API code of a scalar field as it appears on fetched records.
    pub fn code(&self) -> Option<String> {
        match self {
            FieldKind::Native(code) => Some(code.clone()),
            FieldKind::Custom(id) => Some(format!("{}{}", CUSTOM_FIELD_PREFIX, id)),
            FieldKind::Relationship { .. } | FieldKind::SubRecords(_) => None,
        }
    }

    /// Whether values of this kind live in separate child records.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            FieldKind::Relationship { .. } | FieldKind::SubRecords(_)
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Native(code) => write!(f, "native:{}", code),
            FieldKind::Custom(id) => write!(f, "custom:{}", id),
            FieldKind::Relationship { type_id, direction } => {
                write!(f, "relationship:{}:{}", type_id, direction)
            }
            FieldKind::SubRecords(family) => write!(f, "children:{}", family),
        }
    }
}

/// Value shape of a resolved CRM field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrmValueType {
    pub data_type: CrmDataType,
    pub multiple: bool,
    pub has_time: bool,
}

impl CrmValueType {
    pub const fn new(data_type: CrmDataType) -> Self {
        Self {
            data_type,
            multiple: false,
            has_time: false,
        }
    }

    const fn timed(data_type: CrmDataType) -> Self {
        Self {
            data_type,
            multiple: false,
            has_time: true,
        }
    }

    const fn list(data_type: CrmDataType) -> Self {
        Self {
            data_type,
            multiple: true,
            has_time: false,
        }
    }
}

/// A selector resolved against a mapped type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub kind: FieldKind,
    pub value_type: CrmValueType,
}

impl ResolvedField {
    /// Code to send in create/update payloads.
    ///
    /// Some native fields are read under one code and written under another.
    pub fn write_code(&self) -> Option<String> {
        let code = self.kind.code()?;
        Some(
            WRITE_RENAMES
                .iter()
                .find(|(read, _)| *read == code)
                .map(|(_, write)| write.to_string())
                .unwrap_or(code),
        )
    }
}

/// Result of resolving a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Mapped(ResolvedField),
    /// The selector names nothing on this mapped type; the field is skipped.
    Unmapped,
}

impl Resolution {
    pub fn mapped(self) -> Option<ResolvedField> {
        match self {
            Resolution::Mapped(field) => Some(field),
            Resolution::Unmapped => None,
        }
    }
}

/// A Store B field together with what it mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedField {
    pub def: ContentFieldDef,
    pub resolved: ResolvedField,
}

/// A native CRM field on an allow-list.
#[derive(Debug, Clone, Copy)]
pub struct NativeField {
    pub code: &'static str,
    pub value_type: CrmValueType,
}

const fn native(code: &'static str, value_type: CrmValueType) -> NativeField {
    NativeField { code, value_type }
}

use CrmDataType as T;

const CONTACT_COMMON: &[NativeField] = &[
    native("display_name", CrmValueType::new(T::String)),
    native("nick_name", CrmValueType::new(T::String)),
    native("contact_sub_type", CrmValueType::list(T::String)),
    native("source", CrmValueType::new(T::String)),
    native("external_identifier", CrmValueType::new(T::String)),
    native("legal_identifier", CrmValueType::new(T::String)),
    native("preferred_language", CrmValueType::new(T::String)),
    native("preferred_communication_method", CrmValueType::list(T::String)),
    native("image_URL", CrmValueType::new(T::File)),
    native("do_not_email", CrmValueType::new(T::Boolean)),
    native("do_not_phone", CrmValueType::new(T::Boolean)),
    native("do_not_mail", CrmValueType::new(T::Boolean)),
    native("is_opt_out", CrmValueType::new(T::Boolean)),
    native("created_date", CrmValueType::timed(T::Date)),
    native("modified_date", CrmValueType::timed(T::Date)),
];

const INDIVIDUAL: &[NativeField] = &[
    native("first_name", CrmValueType::new(T::String)),
    native("middle_name", CrmValueType::new(T::String)),
    native("last_name", CrmValueType::new(T::String)),
    native("prefix_id", CrmValueType::new(T::Int)),
    native("suffix_id", CrmValueType::new(T::Int)),
    native("formal_title", CrmValueType::new(T::String)),
    native("job_title", CrmValueType::new(T::String)),
    native("gender_id", CrmValueType::new(T::Int)),
    native("birth_date", CrmValueType::new(T::Date)),
    native("is_deceased", CrmValueType::new(T::Boolean)),
    native("deceased_date", CrmValueType::new(T::Date)),
    native("employer_id", CrmValueType::new(T::ContactReference)),
];

const ORGANIZATION: &[NativeField] = &[
    native("organization_name", CrmValueType::new(T::String)),
    native("legal_name", CrmValueType::new(T::String)),
    native("sic_code", CrmValueType::new(T::String)),
];

const HOUSEHOLD: &[NativeField] = &[native("household_name", CrmValueType::new(T::String))];

const ACTIVITY: &[NativeField] = &[
    native("subject", CrmValueType::new(T::String)),
    native("details", CrmValueType::new(T::Memo)),
    native("activity_date_time", CrmValueType::timed(T::Date)),
    native("duration", CrmValueType::new(T::Int)),
    native("location", CrmValueType::new(T::String)),
    native("status_id", CrmValueType::new(T::Int)),
    native("priority_id", CrmValueType::new(T::Int)),
    native("activity_type_id", CrmValueType::new(T::Int)),
    native("source_contact_id", CrmValueType::new(T::ContactReference)),
    native("target_contact_id", CrmValueType::list(T::ContactReference)),
    native("assignee_contact_id", CrmValueType::list(T::ContactReference)),
    native("created_date", CrmValueType::timed(T::Date)),
    native("modified_date", CrmValueType::timed(T::Date)),
];

const PARTICIPANT: &[NativeField] = &[
    native("event_id", CrmValueType::new(T::Int)),
    native("contact_id", CrmValueType::new(T::ContactReference)),
    native("status_id", CrmValueType::new(T::Int)),
    native("role_id", CrmValueType::list(T::Int)),
    native("register_date", CrmValueType::timed(T::Date)),
    native("source", CrmValueType::new(T::String)),
    native("fee_amount", CrmValueType::new(T::Money)),
];

/// Display names accepted as selectors for fields with a different API code.
const SELECTOR_ALIASES: &[(&str, &str)] = &[
    ("target_list", "target_contact_id"),
    ("assignee_list", "assignee_contact_id"),
];

/// Fields read under one code and written under another.
const WRITE_RENAMES: &[(&str, &str)] = &[
    ("target_contact_id", "target_id"),
    ("assignee_contact_id", "assignee_id"),
];

/// Native fields available on a CRM type, in allow-list order.
pub fn native_fields(crm_entity: &str, crm_type: &str) -> Vec<NativeField> {
    match crm_entity {
        "Contact" => {
            let specific: &[NativeField] = match crm_type {
                "Individual" => INDIVIDUAL,
                "Organization" => ORGANIZATION,
                "Household" => HOUSEHOLD,
                _ => &[],
            };
            CONTACT_COMMON.iter().chain(specific).copied().collect()
        }
        "Activity" => ACTIVITY.to_vec(),
        "Participant" => PARTICIPANT.to_vec(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheSlot {
    CustomFields,
    NativeFields,
    ContentFields,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    CustomFields(Arc<[CustomFieldId]>),
    NativeFields(Arc<[NativeField]>),
    ContentFields(Arc<[MappedField]>),
}

/// Memo of registry scans, keyed by mapped type and field kind.
///
/// Owned by the per-request context; dropped with it.
#[derive(Debug, Default)]
pub struct MappingCache {
    entries: HashMap<(MappedTypeId, CacheSlot), CacheEntry>,
    hits: usize,
    misses: usize,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lookups answered from the memo.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Number of lookups that had to scan configuration.
    pub fn misses(&self) -> usize {
        self.misses
    }

    fn get_or_insert_with(
        &mut self,
        mapped: &MappedTypeId,
        slot: CacheSlot,
        build: impl FnOnce() -> CacheEntry,
    ) -> CacheEntry {
        let key = (mapped.clone(), slot);
        if let Some(entry) = self.entries.get(&key) {
            self.hits += 1;
            return entry.clone();
        }
        self.misses += 1;
        let entry = build();
        self.entries.insert(key, entry.clone());
        entry
    }
}

/// Resolves Store B selectors to Store A fields.
#[derive(Debug, Clone)]
pub struct FieldMappingRegistry {
    config: Arc<MappingConfig>,
}

impl FieldMappingRegistry {
    pub fn new(config: Arc<MappingConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn custom_field(&self, id: CustomFieldId) -> Option<&CustomFieldDef> {
        self.config.custom_fields.iter().find(|f| f.id == id)
    }

    /// Resolve a selector for a mapped type.
    pub fn resolve(
        &self,
        cache: &mut MappingCache,
        mapped: &MappedType,
        selector: &str,
    ) -> Resolution {
        let selector = selector.trim();
        if selector.is_empty() {
            return Resolution::Unmapped;
        }

        if let Some(id) = selector
            .strip_prefix(CUSTOM_FIELD_PREFIX)
            .and_then(|rest| rest.parse::<CustomFieldId>().ok())
        {
            if self.custom_ids(cache, mapped).contains(&id) {
                if let Some(def) = self.custom_field(id) {
                    return Resolution::Mapped(ResolvedField {
                        kind: FieldKind::Custom(id),
                        value_type: CrmValueType {
                            data_type: def.data_type,
                            multiple: def.is_multiple(),
                            has_time: def.has_time,
                        },
                    });
                }
            }
        }

        if self.config.sub_record_family(selector).is_some() && mapped.crm_entity == "Contact" {
            return Resolution::Mapped(ResolvedField {
                kind: FieldKind::SubRecords(selector.to_string()),
                value_type: CrmValueType::list(CrmDataType::Memo),
            });
        }

        if let Some(resolved) = self.resolve_relationship(mapped, selector) {
            return Resolution::Mapped(resolved);
        }

        let code = SELECTOR_ALIASES
            .iter()
            .find(|(alias, _)| *alias == selector)
            .map(|(_, code)| *code)
            .unwrap_or(selector);

        match self.natives(cache, mapped).iter().find(|n| n.code == code) {
            Some(native) => Resolution::Mapped(ResolvedField {
                kind: FieldKind::Native(native.code.to_string()),
                value_type: native.value_type,
            }),
            None => Resolution::Unmapped,
        }
    }

    fn resolve_relationship(&self, mapped: &MappedType, selector: &str) -> Option<ResolvedField> {
        let rest = selector.strip_prefix("relationship_")?;
        let (type_id, suffix) = rest.rsplit_once('_')?;
        let type_id: u64 = type_id.parse().ok()?;
        let direction = RelationshipDirection::parse(suffix)?;
        let def = self.config.relationship_type(type_id)?;

        if mapped.crm_entity != "Contact" {
            return None;
        }
        let allowed = match direction {
            RelationshipDirection::AToB => def.contact_type_a.as_deref(),
            RelationshipDirection::BToA => def.contact_type_b.as_deref(),
        };
        if allowed.is_some_and(|t| t != mapped.crm_type) {
            return None;
        }

        Some(ResolvedField {
            kind: FieldKind::Relationship { type_id, direction },
            value_type: CrmValueType::list(CrmDataType::ContactReference),
        })
    }

    fn custom_ids(&self, cache: &mut MappingCache, mapped: &MappedType) -> Arc<[CustomFieldId]> {
        let entry = cache.get_or_insert_with(&mapped.id, CacheSlot::CustomFields, || {
            let ids: Vec<_> = self
                .config
                .custom_fields
                .iter()
                .filter(|f| f.applies_to(&mapped.crm_type, &mapped.crm_entity))
                .map(|f| f.id)
                .collect();
            CacheEntry::CustomFields(ids.into())
        });
        match entry {
            CacheEntry::CustomFields(ids) => ids,
            _ => Arc::from(Vec::new()),
        }
    }

    fn natives(&self, cache: &mut MappingCache, mapped: &MappedType) -> Arc<[NativeField]> {
        let entry = cache.get_or_insert_with(&mapped.id, CacheSlot::NativeFields, || {
            CacheEntry::NativeFields(native_fields(&mapped.crm_entity, &mapped.crm_type).into())
        });
        match entry {
            CacheEntry::NativeFields(fields) => fields,
            _ => Arc::from(Vec::new()),
        }
    }

    /// All mapped Store B fields shown on the mapped type's content type.
    ///
    /// Fields whose selector does not resolve for this mapped type are left
    /// out: a field group may be attached to several content types and only
    /// some of them define every field.
    pub fn content_fields(&self, cache: &mut MappingCache, mapped: &MappedType) -> Arc<[MappedField]> {
        if let Some(CacheEntry::ContentFields(fields)) = cache
            .entries
            .get(&(mapped.id.clone(), CacheSlot::ContentFields))
            .cloned()
        {
            cache.hits += 1;
            return fields;
        }

        let mut fields = Vec::new();
        for group in self
            .config
            .field_groups
            .iter()
            .filter(|g| g.applies_to(&mapped.content_type))
        {
            for def in &group.fields {
                let Some(selector) = def.selector.as_deref() else {
                    continue;
                };
                match self.resolve(cache, mapped, selector) {
                    Resolution::Mapped(resolved) => fields.push(MappedField {
                        def: def.clone(),
                        resolved,
                    }),
                    Resolution::Unmapped => {
                        tracing::debug!(
                            mapped_type = %mapped.id,
                            field = %def.key,
                            selector,
                            "selector does not resolve, field skipped"
                        );
                    }
                }
            }
        }

        let fields: Arc<[MappedField]> = fields.into();
        cache.misses += 1;
        cache.entries.insert(
            (mapped.id.clone(), CacheSlot::ContentFields),
            CacheEntry::ContentFields(fields.clone()),
        );
        fields
    }

    /// Look up a Store B field of the mapped type by key.
    pub fn content_field(
        &self,
        cache: &mut MappingCache,
        mapped: &MappedType,
        key: &str,
    ) -> Option<MappedField> {
        self.content_fields(cache, mapped)
            .iter()
            .find(|f| f.def.key == key)
            .cloned()
    }

    /// Store B fields mirroring the given CRM field code.
    pub fn fields_for_crm_code(
        &self,
        cache: &mut MappingCache,
        mapped: &MappedType,
        code: &str,
    ) -> Vec<MappedField> {
        self.content_fields(cache, mapped)
            .iter()
            .filter(|f| f.resolved.kind.code().as_deref() == Some(code))
            .cloned()
            .collect()
    }

    /// Store B fields mirroring a linked kind (relationships, child families).
    pub fn fields_for_kind(
        &self,
        cache: &mut MappingCache,
        mapped: &MappedType,
        kind: &FieldKind,
    ) -> Vec<MappedField> {
        self.content_fields(cache, mapped)
            .iter()
            .filter(|f| &f.resolved.kind == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelationshipTypeDef, SubRecordFamily};
    use crate::schema::{ContentFieldType, FieldGroup, HtmlType};

    fn people() -> MappedType {
        MappedType::new("people", "Contact", "Individual", "person")
    }

    fn orgs() -> MappedType {
        MappedType::new("orgs", "Contact", "Organization", "organisation")
    }

    fn meetings() -> MappedType {
        MappedType::new("meetings", "Activity", "Meeting", "meeting")
    }

    fn registry() -> FieldMappingRegistry {
        let config = MappingConfig::default()
            .with_mapped_type(people())
            .with_mapped_type(orgs())
            .with_mapped_type(meetings())
            .with_custom_field(
                CustomFieldDef::new(3, "colours", CrmDataType::String)
                    .with_html_type(HtmlType::CheckBox)
                    .extending("Individual"),
            )
            .with_custom_field(
                CustomFieldDef::new(4, "founded", CrmDataType::Date).extending("Organization"),
            )
            .with_relationship_type(RelationshipTypeDef {
                id: 5,
                label_a_b: "Employee of".into(),
                label_b_a: "Employer of".into(),
                contact_type_a: Some("Individual".into()),
                contact_type_b: Some("Organization".into()),
            })
            .with_sub_records(SubRecordFamily {
                selector: "im".into(),
                entity_type: "Im".into(),
                parent_field: "contact_id".into(),
                primary_field: Some("is_primary".into()),
            })
            .with_field_group(
                FieldGroup::new("group_contact", vec!["person".into(), "organisation".into()])
                    .with_field(
                        ContentFieldDef::new("field_first", ContentFieldType::Text)
                            .mapped_to("first_name"),
                    )
                    .with_field(
                        ContentFieldDef::new("field_colours", ContentFieldType::Checkbox)
                            .mapped_to("custom_3"),
                    )
                    .with_field(
                        ContentFieldDef::new("field_display", ContentFieldType::Text)
                            .mapped_to("display_name"),
                    )
                    .with_field(ContentFieldDef::new("field_free", ContentFieldType::Text)),
            );
        FieldMappingRegistry::new(Arc::new(config))
    }

    #[test]
    fn resolves_native_fields_per_type() {
        let registry = registry();
        let mut cache = MappingCache::new();

        let first = registry.resolve(&mut cache, &people(), "first_name");
        assert!(matches!(
            first,
            Resolution::Mapped(ResolvedField { kind: FieldKind::Native(ref c), .. }) if c == "first_name"
        ));

        // Individual-only field is not available on organisations
        assert_eq!(
            registry.resolve(&mut cache, &orgs(), "first_name"),
            Resolution::Unmapped
        );
        // Shared subset is available on both
        assert!(registry
            .resolve(&mut cache, &orgs(), "display_name")
            .mapped()
            .is_some());
    }

    #[test]
    fn custom_membership_checked_first() {
        let registry = registry();
        let mut cache = MappingCache::new();

        let resolved = registry
            .resolve(&mut cache, &people(), "custom_3")
            .mapped()
            .unwrap();
        assert_eq!(resolved.kind, FieldKind::Custom(3));
        assert!(resolved.value_type.multiple);

        // Field 4 extends organisations only
        assert_eq!(
            registry.resolve(&mut cache, &people(), "custom_4"),
            Resolution::Unmapped
        );
        assert_eq!(
            registry.resolve(&mut cache, &orgs(), "custom_4").mapped().unwrap().kind,
            FieldKind::Custom(4)
        );
    }

    #[test]
    fn target_and_assignee_lists_are_renamed() {
        let registry = registry();
        let mut cache = MappingCache::new();

        let target = registry
            .resolve(&mut cache, &meetings(), "target_list")
            .mapped()
            .unwrap();
        assert_eq!(target.kind, FieldKind::Native("target_contact_id".into()));
        assert_eq!(target.write_code().as_deref(), Some("target_id"));

        let assignee = registry
            .resolve(&mut cache, &meetings(), "assignee_contact_id")
            .mapped()
            .unwrap();
        assert_eq!(assignee.write_code().as_deref(), Some("assignee_id"));

        let subject = registry
            .resolve(&mut cache, &meetings(), "subject")
            .mapped()
            .unwrap();
        assert_eq!(subject.write_code().as_deref(), Some("subject"));
    }

    #[test]
    fn relationship_selectors_respect_contact_types() {
        let registry = registry();
        let mut cache = MappingCache::new();

        let employee_of = registry
            .resolve(&mut cache, &people(), "relationship_5_ab")
            .mapped()
            .unwrap();
        assert_eq!(
            employee_of.kind,
            FieldKind::Relationship {
                type_id: 5,
                direction: RelationshipDirection::AToB
            }
        );
        assert!(employee_of.write_code().is_none());

        // Individuals are never the `b` end of this type
        assert_eq!(
            registry.resolve(&mut cache, &people(), "relationship_5_ba"),
            Resolution::Unmapped
        );
        assert_eq!(
            registry.resolve(&mut cache, &people(), "relationship_99_ab"),
            Resolution::Unmapped
        );
    }

    #[test]
    fn sub_record_families_resolve_for_contacts() {
        let registry = registry();
        let mut cache = MappingCache::new();

        assert_eq!(
            registry.resolve(&mut cache, &people(), "im").mapped().unwrap().kind,
            FieldKind::SubRecords("im".into())
        );
        assert_eq!(
            registry.resolve(&mut cache, &meetings(), "im"),
            Resolution::Unmapped
        );
    }

    #[test]
    fn content_fields_skip_unmapped_and_memoize() {
        let registry = registry();
        let mut cache = MappingCache::new();

        let person_fields = registry.content_fields(&mut cache, &people());
        let keys: Vec<_> = person_fields.iter().map(|f| f.def.key.as_str()).collect();
        assert_eq!(keys, vec!["field_first", "field_colours", "field_display"]);

        // Same group on organisations only yields the shared field
        let org_fields = registry.content_fields(&mut cache, &orgs());
        let keys: Vec<_> = org_fields.iter().map(|f| f.def.key.as_str()).collect();
        assert_eq!(keys, vec!["field_display"]);

        let hits_before = cache.hits();
        registry.content_fields(&mut cache, &people());
        assert_eq!(cache.hits(), hits_before + 1);
    }

    #[test]
    fn reverse_lookup_by_code() {
        let registry = registry();
        let mut cache = MappingCache::new();

        let fields = registry.fields_for_crm_code(&mut cache, &people(), "custom_3");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].def.key, "field_colours");
        assert!(registry
            .fields_for_crm_code(&mut cache, &people(), "last_name")
            .is_empty());
    }

    #[test]
    fn blank_selector_is_unmapped() {
        let registry = registry();
        let mut cache = MappingCache::new();
        assert_eq!(
            registry.resolve(&mut cache, &people(), "  "),
            Resolution::Unmapped
        );
    }
}
