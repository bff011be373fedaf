//! Capability providers and notification sinks.
//!
//! Questions like "can this CRM type hold attachments" are answered by
//! providers registered at startup, and broadcast notifications go to sinks
//! registered the same way. The orchestrator iterates both lists directly.

use crate::context::SyncNotification;
use std::sync::{Arc, Mutex};

/// Answers capability questions about CRM types.
pub trait CapabilityProvider: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether records of `crm_type` can hold file attachments.
    ///
    /// `None` means this provider has no opinion.
    fn supports_attachments(&self, _crm_type: &str) -> Option<bool> {
        None
    }
}

/// Receives broadcast notifications after each applied sync.
pub trait NotificationSink: Send {
    fn notify(&self, notification: &SyncNotification);
}

/// Provider backed by a fixed list of CRM types.
#[derive(Debug, Clone)]
pub struct AttachmentTypes {
    types: Vec<String>,
}

impl AttachmentTypes {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl CapabilityProvider for AttachmentTypes {
    fn name(&self) -> &str {
        "attachment-types"
    }

    fn supports_attachments(&self, crm_type: &str) -> Option<bool> {
        Some(self.types.iter().any(|t| t == crm_type))
    }
}

/// Sink that keeps every notification, for hosts that poll.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    received: Arc<Mutex<Vec<SyncNotification>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far.
    pub fn received(&self) -> Vec<SyncNotification> {
        self.received
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for CollectingSink {
    fn notify(&self, notification: &SyncNotification) {
        if let Ok(mut list) = self.received.lock() {
            list.push(notification.clone());
        }
    }
}

/// Registry of capability providers and notification sinks.
#[derive(Default)]
pub struct Capabilities {
    providers: Vec<Box<dyn CapabilityProvider>>,
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl CapabilityProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// First provider answer wins; types nobody claims have no attachments.
    pub fn supports_attachments(&self, crm_type: &str) -> bool {
        self.providers
            .iter()
            .find_map(|p| p.supports_attachments(crm_type))
            .unwrap_or(false)
    }

    /// Deliver a notification to every sink.
    pub fn broadcast(&self, notification: &SyncNotification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SyncAction;
    use crate::Direction;

    struct NoOpinion;

    impl CapabilityProvider for NoOpinion {
        fn name(&self) -> &str {
            "no-opinion"
        }
    }

    #[test]
    fn first_answer_wins() {
        let caps = Capabilities::new()
            .with_provider(NoOpinion)
            .with_provider(AttachmentTypes::new(["Individual"]))
            .with_provider(AttachmentTypes::new(["Meeting"]));

        assert!(caps.supports_attachments("Individual"));
        // The second provider answered "no" first
        assert!(!caps.supports_attachments("Meeting"));
        assert!(!Capabilities::new().supports_attachments("Individual"));
    }

    #[test]
    fn broadcast_reaches_every_sink() {
        let a = CollectingSink::new();
        let b = CollectingSink::new();
        let caps = Capabilities::new().with_sink(a.clone()).with_sink(b.clone());

        caps.broadcast(&SyncNotification {
            mapped_type: "people".into(),
            direction: Direction::CrmToContent,
            action: SyncAction::Created,
            source_id: 100,
            before: None,
            after: Some(55),
        });

        assert_eq!(a.received().len(), 1);
        assert_eq!(b.received()[0].after, Some(55));
    }
}
