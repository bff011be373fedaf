//! Mapping configuration.
//!
//! Everything the engine needs to know about which types and fields take
//! part in a sync is loaded once into a [`MappingConfig`]. The admin tooling
//! that edits it lives outside the engine; here it is read-only.

use crate::{
    error::Result,
    schema::{CustomFieldDef, FieldGroup},
    Error, MappedTypeId, Side,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Declared correspondence between one CRM type and one content type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedType {
    /// Stable name of this mapping (used as the EntityLink namespace)
    pub id: MappedTypeId,
    /// CRM top-level entity, e.g. "Contact" or "Activity"
    pub crm_entity: String,
    /// CRM type records of this mapping have, e.g. "Individual" or "Meeting"
    pub crm_type: String,
    /// Content type on Store B, e.g. "person"
    pub content_type: String,
}

impl MappedType {
    pub fn new(
        id: impl Into<MappedTypeId>,
        crm_entity: impl Into<String>,
        crm_type: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            crm_entity: crm_entity.into(),
            crm_type: crm_type.into(),
            content_type: content_type.into(),
        }
    }

    /// Record type on the given side.
    pub fn type_on(&self, side: Side) -> &str {
        match side {
            Side::Crm => &self.crm_type,
            Side::Content => &self.content_type,
        }
    }
}

/// A directional relationship type between two CRM contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipTypeDef {
    pub id: u64,
    #[serde(default)]
    pub label_a_b: String,
    #[serde(default)]
    pub label_b_a: String,
    /// CRM type allowed at the `a` end (any contact when unset)
    #[serde(default)]
    pub contact_type_a: Option<String>,
    /// CRM type allowed at the `b` end (any contact when unset)
    #[serde(default)]
    pub contact_type_b: Option<String>,
}

/// A family of CRM child records mirrored as a repeater field on Store B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubRecordFamily {
    /// Selector a repeater field uses to mirror this family
    pub selector: String,
    /// CRM child entity, e.g. "Im" or "Address"
    pub entity_type: String,
    /// Child field holding the parent id
    pub parent_field: String,
    /// Singleton flag of which at most one family member may be set
    #[serde(default)]
    pub primary_field: Option<String>,
}

/// Behavioural switches of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Create the counterpart when no EntityLink exists yet
    pub create_on_demand: bool,
    /// Delete the counterpart when a linked record is deleted
    pub delete_counterparts: bool,
    /// Fields that are omitted from a payload rather than written as empty
    pub never_empty: Vec<String>,
    /// CRM fields written back to the content side after every write
    pub derived_fields: Vec<String>,
    /// Content field that, when truthy, opts a record out of syncing
    pub do_not_sync_field: Option<String>,
    /// Upper bound for a batch chunk
    pub max_chunk: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            create_on_demand: true,
            delete_counterparts: false,
            never_empty: vec![
                "created_date".into(),
                "modified_date".into(),
                "activity_date_time".into(),
                "source_contact_id".into(),
            ],
            derived_fields: vec!["modified_date".into()],
            do_not_sync_field: Some("_tandem_skip".into()),
            max_chunk: 500,
        }
    }
}

/// The complete mapping configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    #[serde(default)]
    pub mapped_types: Vec<MappedType>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldDef>,
    #[serde(default)]
    pub field_groups: Vec<FieldGroup>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipTypeDef>,
    #[serde(default)]
    pub sub_records: Vec<SubRecordFamily>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl MappingConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style method to add a mapped type.
    pub fn with_mapped_type(mut self, mapped: MappedType) -> Self {
        self.mapped_types.push(mapped);
        self
    }

    pub fn with_custom_field(mut self, field: CustomFieldDef) -> Self {
        self.custom_fields.push(field);
        self
    }

    pub fn with_field_group(mut self, group: FieldGroup) -> Self {
        self.field_groups.push(group);
        self
    }

    pub fn with_relationship_type(mut self, relationship: RelationshipTypeDef) -> Self {
        self.relationship_types.push(relationship);
        self
    }

    pub fn with_sub_records(mut self, family: SubRecordFamily) -> Self {
        self.sub_records.push(family);
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Check the uniqueness invariants of the mapping table.
    ///
    /// At most one content type maps to a CRM type and vice versa; mapped
    /// type ids are unique.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut crm_types = HashSet::new();
        let mut content_types = HashSet::new();

        for mapped in &self.mapped_types {
            if !ids.insert(mapped.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "mapped type id '{}' declared twice",
                    mapped.id
                )));
            }
            if !crm_types.insert((mapped.crm_entity.as_str(), mapped.crm_type.as_str())) {
                return Err(Error::DuplicateMappedType {
                    side: Side::Crm,
                    entity_type: mapped.crm_type.clone(),
                });
            }
            if !content_types.insert(mapped.content_type.as_str()) {
                return Err(Error::DuplicateMappedType {
                    side: Side::Content,
                    entity_type: mapped.content_type.clone(),
                });
            }
        }

        if self.sync.max_chunk == 0 {
            return Err(Error::InvalidConfig("maxChunk must be positive".into()));
        }

        Ok(())
    }

    /// Look up a mapped type by id.
    pub fn mapped_type(&self, id: &str) -> Option<&MappedType> {
        self.mapped_types.iter().find(|m| m.id == id)
    }

    /// Look up the mapped type a record of `entity_type` on `side` belongs to.
    pub fn mapped_type_for(&self, side: Side, entity_type: &str) -> Option<&MappedType> {
        self.mapped_types
            .iter()
            .find(|m| m.type_on(side) == entity_type)
    }

    /// Mapped types whose CRM records are of the given top-level entity.
    pub fn mapped_types_of_entity<'a>(
        &'a self,
        crm_entity: &'a str,
    ) -> impl Iterator<Item = &'a MappedType> + 'a {
        self.mapped_types
            .iter()
            .filter(move |m| m.crm_entity == crm_entity)
    }

    pub fn relationship_type(&self, id: u64) -> Option<&RelationshipTypeDef> {
        self.relationship_types.iter().find(|r| r.id == id)
    }

    pub fn sub_record_family(&self, selector: &str) -> Option<&SubRecordFamily> {
        self.sub_records.iter().find(|f| f.selector == selector)
    }

    /// Family whose child records are of the given CRM entity type.
    pub fn sub_record_family_for_entity(&self, entity_type: &str) -> Option<&SubRecordFamily> {
        self.sub_records
            .iter()
            .find(|f| f.entity_type == entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MappedType {
        MappedType::new("people", "Contact", "Individual", "person")
    }

    #[test]
    fn lookup_by_side() {
        let config = MappingConfig::default()
            .with_mapped_type(people())
            .with_mapped_type(MappedType::new(
                "organisations",
                "Contact",
                "Organization",
                "organisation",
            ));

        assert_eq!(
            config.mapped_type_for(Side::Crm, "Organization").unwrap().id,
            "organisations"
        );
        assert_eq!(
            config.mapped_type_for(Side::Content, "person").unwrap().id,
            "people"
        );
        assert!(config.mapped_type_for(Side::Crm, "Household").is_none());
        assert_eq!(config.mapped_types_of_entity("Contact").count(), 2);
    }

    #[test]
    fn duplicate_crm_type_rejected() {
        let config = MappingConfig::default()
            .with_mapped_type(people())
            .with_mapped_type(MappedType::new("staff", "Contact", "Individual", "staff"));

        assert!(matches!(
            config.validate(),
            Err(Error::DuplicateMappedType { side: Side::Crm, .. })
        ));
    }

    #[test]
    fn duplicate_content_type_rejected() {
        let config = MappingConfig::default()
            .with_mapped_type(people())
            .with_mapped_type(MappedType::new("orgs", "Contact", "Organization", "person"));

        assert!(matches!(
            config.validate(),
            Err(Error::DuplicateMappedType {
                side: Side::Content,
                ..
            })
        ));
    }

    #[test]
    fn from_json_applies_defaults() {
        let config = MappingConfig::from_json(
            r#"{
                "mappedTypes": [
                    {"id": "people", "crmEntity": "Contact", "crmType": "Individual", "contentType": "person"}
                ],
                "sync": {"deleteCounterparts": true}
            }"#,
        )
        .unwrap();

        assert!(config.sync.create_on_demand);
        assert!(config.sync.delete_counterparts);
        assert!(config.sync.never_empty.contains(&"modified_date".to_string()));
        assert_eq!(config.sync.max_chunk, 500);
    }

    #[test]
    fn from_json_reports_parse_errors() {
        let result = MappingConfig::from_json("{ not json");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
