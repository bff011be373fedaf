//! WebSocket message protocol definitions.
//!
//! All messages are JSON objects tagged by a snake_case `type`. Broadcast
//! notifications carry the engine's camelCase notification fields next to
//! the tag.

use serde::{Deserialize, Serialize};
use tandem_engine::{MappedTypeId, SyncNotification};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Only receive notifications for these mapped types (empty for all).
    Subscribe {
        #[serde(default)]
        mapped_types: Vec<MappedTypeId>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A sync was applied.
    Notification(SyncNotification),

    /// Acknowledges a subscription change.
    Subscribed { mapped_types: Vec<MappedTypeId> },

    /// Response to ping.
    Pong,

    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_engine::{Direction, SyncAction};

    #[test]
    fn client_message_deserialization() {
        let json = r#"{"type": "subscribe", "mapped_types": ["people", "orgs"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                mapped_types: vec!["people".into(), "orgs".into()]
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "subscribe"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe { mapped_types: vec![] });

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let json = serde_json::to_string(&ServerMessage::error("bad frame")).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"bad frame"}"#);
    }

    #[test]
    fn notification_fields_sit_next_to_the_tag() {
        let msg = ServerMessage::Notification(SyncNotification {
            mapped_type: "people".into(),
            direction: Direction::CrmToContent,
            action: SyncAction::Created,
            source_id: 7,
            before: None,
            after: Some(501),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["mappedType"], "people");
        assert_eq!(value["direction"], "crmToContent");
        assert_eq!(value["action"], "created");
        assert_eq!(value["sourceId"], 7);
        assert_eq!(value["after"], 501);
    }
}
