//! Live channel event types and serialization
//!
//! Defines the client-to-server and server-to-client frames exchanged over
//! the WebSocket. Both sides use the same definitions: the server serializes
//! [`ServerEvent`], the client engine deserializes it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Message, MessageId, UserId};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Heartbeat ping
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Connection admitted to the presence registry
    Connected { session_id: Uuid },

    /// Full roster of currently online identities
    PresenceRoster { online_users: Vec<UserId> },

    /// A message addressed to this identity (full persisted record)
    NewMessage { message: Message },

    /// A message this identity sent reached a live receiver
    MessageDelivered { message_id: MessageId },

    /// The partner read messages this identity sent
    MessagesRead {
        message_ids: Vec<MessageId>,
        read_by: UserId,
    },

    /// Outstanding unread count from `from_user_id` changed
    UnreadCountChanged {
        from_user_id: UserId,
        unread_count: i64,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    /// Wire name of the event, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::PresenceRoster { .. } => "presence-roster",
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::MessageDelivered { .. } => "message-delivered",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::UnreadCountChanged { .. } => "unread-count-changed",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_deserialization() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(event, ClientEvent::Ping);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::Pong;
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_messages_read_wire_format() {
        let id = MessageId(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap());
        let reader = UserId(Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap());
        let event = ServerEvent::MessagesRead {
            message_ids: vec![id],
            read_by: reader,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messages-read");
        assert_eq!(json["messageIds"][0], "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(json["readBy"], "6ba7b810-9dad-11d1-80b4-00c04fd430c8");
        assert_eq!(event.kind(), "messages-read");
    }

    #[test]
    fn test_unread_count_changed_round_trip() {
        let json = r#"{"type":"unread-count-changed","fromUserId":"550e8400-e29b-41d4-a716-446655440000","unreadCount":3}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::UnreadCountChanged {
                from_user_id,
                unread_count,
            } => {
                assert_eq!(from_user_id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
                assert_eq!(unread_count, 3);
            }
            other => panic!("Expected UnreadCountChanged, got {other:?}"),
        }
    }

    #[test]
    fn test_error_event_serialization() {
        let event = ServerEvent::Error {
            message: "Test error".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("Test error"));
    }
}
