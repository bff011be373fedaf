//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and fans sync notifications out to
//! the ones subscribed to the notification's mapped type.

use std::sync::Arc;

use dashmap::DashMap;
use tandem_engine::{MappedTypeId, NotificationSink, SyncNotification};
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    /// Mapped types this connection listens to; empty for all
    pub mapped_types: Vec<MappedTypeId>,
}

impl Connection {
    fn wants(&self, mapped_type: &str) -> bool {
        self.mapped_types.is_empty() || self.mapped_types.iter().any(|m| m == mapped_type)
    }
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection listening to every mapped type.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            conn_id.clone(),
            Connection {
                sender,
                mapped_types: Vec::new(),
            },
        );
        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");
        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            tracing::info!(conn_id = %conn_id, "WebSocket connection unregistered");
        }
    }

    /// Replace the subscription of a connection.
    pub fn subscribe(&self, conn_id: &str, mapped_types: Vec<MappedTypeId>) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.mapped_types = mapped_types;
                true
            }
            None => false,
        }
    }

    /// Send a notification to every interested connection.
    ///
    /// Returns the number of connections that received it.
    pub fn broadcast(&self, notification: &SyncNotification) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.wants(&notification.mapped_type)
                && conn
                    .sender
                    .send(ServerMessage::Notification(notification.clone()))
                    .is_ok()
            {
                sent_count += 1;
            }
        }

        tracing::debug!(
            mapped_type = %notification.mapped_type,
            recipients = sent_count,
            "Broadcast sync notification"
        );
        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Forwards engine notifications to the WebSocket clients.
#[derive(Debug, Clone)]
pub struct WsSink {
    manager: Arc<ConnectionManager>,
}

impl WsSink {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

impl NotificationSink for WsSink {
    fn notify(&self, notification: &SyncNotification) {
        self.manager.broadcast(notification);
    }
}
