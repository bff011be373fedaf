//! Edge case tests for tandem-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::{json, Value};
use tandem_engine::{
    ChangeEvent, ChangeKind, ChunkRequest, ContentFieldDef, ContentFieldType, Error, ErrorKind,
    EventOutcome, FieldGroup, Fields, LinkSnapshot, MappedType, MappingConfig, MemoryLinkStore,
    MemoryStore, Orchestrator, Record, Side, SyncContext,
};

const CONFIG_JSON: &str = r#"{
    "mappedTypes": [
        {"id": "people", "crmEntity": "Contact", "crmType": "Individual", "contentType": "person"}
    ],
    "fieldGroups": [
        {
            "key": "person",
            "contentTypes": ["person"],
            "fields": [
                {"key": "field_first", "fieldType": "text", "selector": "first_name"},
                {"key": "field_birth", "fieldType": "date_picker", "selector": "birth_date"},
                {"key": "field_created", "fieldType": "date_time_picker", "selector": "created_date"},
                {"key": "field_notes", "fieldType": "textarea", "selector": "not_a_crm_field"}
            ]
        }
    ],
    "sync": {"maxChunk": 10}
}"#;

fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap_or_default()
}

fn engine_from_json(
    crm: MemoryStore,
    content: MemoryStore,
) -> Orchestrator<MemoryStore, MemoryStore, MemoryLinkStore> {
    let config = MappingConfig::from_json(CONFIG_JSON).unwrap();
    Orchestrator::new(
        config,
        crm,
        content,
        MemoryLinkStore::new(),
    )
    .unwrap()
}

fn crm_with(records: Vec<(u64, Value)>) -> MemoryStore {
    let mut crm = MemoryStore::new(Side::Crm, 100);
    for (id, value) in records {
        crm.seed(Record::new(id, "Individual", fields(value)));
    }
    crm
}

// ============================================================================
// Configuration Edge Cases
// ============================================================================

#[test]
fn json_config_fills_defaults() {
    let config = MappingConfig::from_json(CONFIG_JSON).unwrap();
    assert_eq!(config.sync.max_chunk, 10);
    assert!(config.sync.create_on_demand);
    assert!(config.sync.never_empty.contains(&"created_date".to_string()));
}

#[test]
fn malformed_json_config() {
    let err = MappingConfig::from_json("{\"mappedTypes\": 3}").unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn two_content_types_for_one_crm_type() {
    let config = MappingConfig::default()
        .with_mapped_type(MappedType::new("people", "Contact", "Individual", "person"))
        .with_mapped_type(MappedType::new("staff", "Contact", "Individual", "staff"));

    let err = Orchestrator::new(
        config,
        MemoryStore::new(Side::Crm, 1),
        MemoryStore::new(Side::Content, 1),
        MemoryLinkStore::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DuplicateMappedType { side: Side::Crm, .. }));
}

#[test]
fn stores_on_the_wrong_sides() {
    let err = Orchestrator::new(
        MappingConfig::default(),
        MemoryStore::new(Side::Content, 1),
        MemoryStore::new(Side::Crm, 1),
        MemoryLinkStore::new(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn empty_config_skips_everything() {
    let mut crm = MemoryStore::new(Side::Crm, 100);
    crm.seed(Record::new(1, "Individual", Fields::new()));
    let mut engine = Orchestrator::new(
        MappingConfig::default(),
        crm,
        MemoryStore::new(Side::Content, 1),
        MemoryLinkStore::new(),
    )
    .unwrap();

    let report = engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", 1),
    );
    assert!(!report.outcomes[0].is_applied());
    assert!(engine.content().is_empty());
}

// ============================================================================
// Value Edge Cases
// ============================================================================

#[test]
fn unmapped_selector_is_silently_skipped() {
    let crm = crm_with(vec![(1, json!({"first_name": "Ada"}))]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));

    let report = engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", 1),
    );

    assert!(report.is_ok());
    let created = engine.content().get(500).unwrap();
    assert_eq!(created.get("field_first"), Some(&json!("Ada")));
    assert!(created.get("field_notes").is_none());
}

#[test]
fn unicode_values_pass_through() {
    let names = ["日本語テスト", "Привет мир", "🎉🚀💯", "Hello\nWorld\tTab"];
    let crm = crm_with(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u64 + 1, json!({"first_name": name})))
            .collect(),
    );
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));

    for id in 1..=names.len() as u64 {
        engine.dispatch(
            &mut SyncContext::new(),
            ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", id),
        );
    }

    for (offset, name) in names.iter().enumerate() {
        let record = engine.content().get(500 + offset as u64).unwrap();
        assert_eq!(record.get("field_first"), Some(&json!(name)));
    }
}

#[test]
fn crm_date_encodings_normalise() {
    // Store A returns compact dates on create and dashed dates on edit
    let crm = crm_with(vec![
        (1, json!({"birth_date": "19151210", "created_date": "20240102030405"})),
        (2, json!({"birth_date": "1815-12-10", "created_date": "2024-01-02 03:04:05"})),
    ]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));

    for id in [1, 2] {
        engine.dispatch(
            &mut SyncContext::new(),
            ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", id),
        );
    }

    let first = engine.content().get(500).unwrap();
    let second = engine.content().get(501).unwrap();
    assert_eq!(first.get("field_birth"), Some(&json!("19151210")));
    assert_eq!(second.get("field_birth"), Some(&json!("18151210")));
    assert_eq!(first.get("field_created"), second.get("field_created"));
    assert_eq!(first.get("field_created"), Some(&json!("2024-01-02 03:04:05")));
}

#[test]
fn content_dates_go_back_in_crm_format() {
    let crm = crm_with(vec![(1, json!({}))]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));
    engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", 1),
    );

    engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Content, ChangeKind::Updated, "person", 500)
            .with_fields(fields(json!({"field_birth": "19151210"}))),
    );
    assert_eq!(engine.crm().get(1).unwrap().get("birth_date"), Some(&json!("19151210")));
}

#[test]
fn unreadable_value_is_omitted_not_fatal() {
    let crm = crm_with(vec![(
        1,
        json!({"first_name": "Ada", "birth_date": "the tenth of December"}),
    )]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));

    let report = engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", 1),
    );

    assert!(report.is_ok());
    let created = engine.content().get(500).unwrap();
    assert_eq!(created.get("field_first"), Some(&json!("Ada")));
    assert!(created.get("field_birth").is_none());
}

#[test]
fn never_empty_field_is_omitted_when_cleared() {
    let crm = crm_with(vec![(1, json!({"created_date": "2024-01-02 03:04:05"}))]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));
    engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", 1),
    );

    let report = engine.dispatch(
        &mut SyncContext::new(),
        ChangeEvent::new(Side::Content, ChangeKind::Updated, "person", 500)
            .with_fields(fields(json!({"field_created": ""}))),
    );

    assert_eq!(report.outcomes, vec![EventOutcome::Unchanged]);
    assert_eq!(
        engine.crm().get(1).unwrap().get("created_date"),
        Some(&json!("2024-01-02 03:04:05"))
    );
}

// ============================================================================
// Batch Edge Cases
// ============================================================================

#[test]
fn chunk_past_the_end() {
    let crm = crm_with(vec![(1, json!({})), (2, json!({}))]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));

    let report = engine
        .sync_chunk(
            &mut SyncContext::new(),
            &ChunkRequest {
                side: Side::Crm,
                mapped_type: "people".into(),
                offset: 10,
                limit: 5,
            },
        )
        .unwrap();

    assert_eq!(report.count, 0);
    assert_eq!(report.total, 2);
    assert_eq!(report.next_offset, None);
}

#[test]
fn zero_limit_still_makes_progress() {
    let crm = crm_with(vec![(1, json!({})), (2, json!({}))]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));

    let report = engine
        .sync_chunk(
            &mut SyncContext::new(),
            &ChunkRequest {
                side: Side::Crm,
                mapped_type: "people".into(),
                offset: 0,
                limit: 0,
            },
        )
        .unwrap();

    assert_eq!(report.count, 1);
    assert_eq!(report.next_offset, Some(1));
}

#[test]
fn content_side_backfill() {
    let mut content = MemoryStore::new(Side::Content, 500);
    for id in 500..503 {
        content.seed(Record::new(id, "person", fields(json!({"field_first": format!("P{}", id)}))));
    }
    let mut engine = engine_from_json(MemoryStore::new(Side::Crm, 100), content);

    let report = engine
        .sync_chunk(
            &mut SyncContext::new(),
            &ChunkRequest {
                side: Side::Content,
                mapped_type: "people".into(),
                offset: 0,
                limit: 10,
            },
        )
        .unwrap();

    assert_eq!(report.applied, 3);
    assert_eq!(engine.crm().records_of("Individual").len(), 3);
    assert_eq!(engine.crm().get(100).unwrap().get("first_name"), Some(&json!("P500")));
}

// ============================================================================
// Persistence Edge Cases
// ============================================================================

#[test]
fn links_survive_a_snapshot() {
    let crm = crm_with(vec![(1, json!({"first_name": "Ada"})), (2, json!({}))]);
    let mut engine = engine_from_json(crm, MemoryStore::new(Side::Content, 500));
    for id in [1, 2] {
        engine.dispatch(
            &mut SyncContext::new(),
            ChangeEvent::new(Side::Crm, ChangeKind::Created, "Individual", id),
        );
    }

    let snapshot = LinkSnapshot::capture(engine.identity().store());
    let json = snapshot.to_json().unwrap();
    let restored = LinkSnapshot::from_json(&json).unwrap().restore().unwrap();

    assert_eq!(restored.all_links(), engine.identity().store().all_links());
    // same store, same bytes
    assert_eq!(LinkSnapshot::capture(&restored).to_json().unwrap(), json);
}

#[test]
fn snapshot_with_conflicting_links_is_rejected() {
    let json = r#"{"formatVersion": 1, "links": {"people": {"1": 500, "2": 500}}}"#;
    let err = LinkSnapshot::from_json(json).unwrap().restore().unwrap_err();
    assert!(matches!(err, Error::InvalidSnapshot(_)));
}

#[test]
fn field_groups_can_target_several_types() {
    let config = MappingConfig::default()
        .with_mapped_type(MappedType::new("people", "Contact", "Individual", "person"))
        .with_mapped_type(MappedType::new("orgs", "Contact", "Organization", "organisation"))
        .with_field_group(
            FieldGroup::new("shared", vec!["person".into(), "organisation".into()])
                .with_field(
                    ContentFieldDef::new("field_name", ContentFieldType::Text)
                        .mapped_to("organization_name"),
                )
                .with_field(
                    ContentFieldDef::new("field_display", ContentFieldType::Text)
                        .mapped_to("display_name"),
                ),
        );
    let mut crm = MemoryStore::new(Side::Crm, 100);
    crm.seed(Record::new(
        1,
        "Individual",
        fields(json!({"display_name": "Ada", "organization_name": "ignored"})),
    ));
    crm.seed(Record::new(
        2,
        "Organization",
        fields(json!({"display_name": "Acme", "organization_name": "Acme Ltd"})),
    ));
    let mut engine = Orchestrator::new(
        config,
        crm,
        MemoryStore::new(Side::Content, 500),
        MemoryLinkStore::new(),
    )
    .unwrap();

    for (id, crm_type) in [(1, "Individual"), (2, "Organization")] {
        engine.dispatch(
            &mut SyncContext::new(),
            ChangeEvent::new(Side::Crm, ChangeKind::Created, crm_type, id),
        );
    }

    // organization_name is not a field of individuals
    let person = engine.content().get(500).unwrap();
    assert_eq!(person.get("field_display"), Some(&json!("Ada")));
    assert!(person.get("field_name").is_none());
    let org = engine.content().get(501).unwrap();
    assert_eq!(org.get("field_name"), Some(&json!("Acme Ltd")));
}
