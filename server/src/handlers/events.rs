//! Inbound change events (store webhooks).

use serde::{Deserialize, Serialize};
use tandem_engine::{
    ChangeEvent, ChangeKind, DispatchReport, ErrorKind, EventOutcome, Fields, LinkStore,
    RecordId, RecordStore, Side, SyncNotification,
};

use crate::error::Result;
use crate::service::SyncService;

/// Body of `POST /events/{side}`; the side comes from the path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub kind: ChangeKind,
    /// Record type, when the store knows it
    #[serde(default)]
    pub entity_type: Option<String>,
    pub id: RecordId,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub previous: Fields,
}

impl WebhookEvent {
    pub fn into_event(self, side: Side) -> ChangeEvent {
        let event = match self.entity_type {
            Some(entity_type) => ChangeEvent::new(side, self.kind, entity_type, self.id),
            None => ChangeEvent::bare(side, self.kind, self.id),
        };
        event.with_fields(self.fields).with_previous(self.previous)
    }
}

/// A failed event in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEvent {
    pub side: Side,
    pub id: RecordId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Response of `POST /events/{side}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    /// Events handled, including follow-ups raised during the pass
    pub processed: usize,
    pub applied: usize,
    /// Echoes of our own writes that were dropped
    pub suppressed: usize,
    pub outcomes: Vec<EventOutcome>,
    pub failures: Vec<FailedEvent>,
    pub notifications: Vec<SyncNotification>,
}

impl From<DispatchReport> for EventResponse {
    fn from(report: DispatchReport) -> Self {
        Self {
            processed: report.processed(),
            applied: report.applied(),
            suppressed: report.suppressed,
            failures: report
                .failures
                .into_iter()
                .map(|f| FailedEvent {
                    side: f.side,
                    id: f.id,
                    kind: f.error.kind(),
                    message: f.error.to_string(),
                })
                .collect(),
            outcomes: report.outcomes,
            notifications: report.notifications,
        }
    }
}

/// Run a sync pass for one webhook.
pub async fn handle_event<C, T, L>(
    service: &SyncService<C, T, L>,
    side: Side,
    webhook: WebhookEvent,
) -> Result<EventResponse>
where
    C: RecordStore + Send + 'static,
    T: RecordStore + Send + 'static,
    L: LinkStore + Send + 'static,
{
    let event = webhook.into_event(side);
    tracing::info!(
        side = %event.side,
        kind = ?event.kind,
        entity_type = event.entity_type.as_deref().unwrap_or("?"),
        id = event.id,
        "Received change event"
    );

    let report = service.dispatch(event).await?;
    if !report.is_ok() {
        tracing::warn!(failures = report.failures.len(), "Sync pass finished with failures");
    }
    Ok(report.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_engine::{
        ContentFieldDef, ContentFieldType, FieldGroup, MappedType, MappingConfig,
        MemoryLinkStore, MemoryStore, Orchestrator, Record,
    };

    #[test]
    fn webhook_without_type_builds_a_bare_event() {
        let webhook: WebhookEvent =
            serde_json::from_value(json!({"kind": "updated", "id": 9})).unwrap();
        let event = webhook.into_event(Side::Content);
        assert_eq!(event, ChangeEvent::bare(Side::Content, ChangeKind::Updated, 9));
    }

    #[test]
    fn webhook_keeps_fields_and_previous_values() {
        let webhook: WebhookEvent = serde_json::from_value(json!({
            "kind": "updated",
            "entityType": "Individual",
            "id": 3,
            "fields": {"first_name": "Ada"},
            "previous": {"first_name": "Ad"}
        }))
        .unwrap();
        let event = webhook.into_event(Side::Crm);
        assert_eq!(event.entity_type.as_deref(), Some("Individual"));
        assert_eq!(event.fields["first_name"], "Ada");
        assert_eq!(event.previous["first_name"], "Ad");
    }

    #[tokio::test]
    async fn failures_are_reported_with_their_kind() {
        let config = MappingConfig::default()
            .with_mapped_type(MappedType::new("people", "Contact", "Individual", "person"))
            .with_field_group(FieldGroup::new("person", vec!["person".into()]).with_field(
                ContentFieldDef::new("field_first", ContentFieldType::Text).mapped_to("first_name"),
            ));
        let mut crm = MemoryStore::new(Side::Crm, 1);
        crm.seed(Record::new(
            1,
            "Individual",
            json!({"first_name": "Ada"}).as_object().cloned().unwrap(),
        ));
        let mut content = MemoryStore::new(Side::Content, 500);
        content.fail_on("create", "person");
        let service = SyncService::new(
            Orchestrator::new(config, crm, content, MemoryLinkStore::new()).unwrap(),
        );

        let webhook = WebhookEvent {
            kind: ChangeKind::Created,
            entity_type: Some("Individual".into()),
            id: 1,
            fields: Fields::new(),
            previous: Fields::new(),
        };
        let response = handle_event(&service, Side::Crm, webhook).await.unwrap();

        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].kind, ErrorKind::Remote);
        assert_eq!(response.failures[0].id, 1);
        assert_eq!(response.applied, 0);
    }
}
