use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::RoomId;

// ============================================================================
// ChatFrame - inbound client frame
// ============================================================================

/// Message frame sent by a client over its socket.
///
/// A `group_id` in the frame is accepted for compatibility with clients that
/// echo it, but ignored: the room always comes from the session binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFrame {
    #[serde(rename = "name")]
    pub sender_name: String,

    #[serde(rename = "message", default)]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing)]
    pub group_id: Option<String>,
}

// ============================================================================
// ChatEvent - the unit carried by the fabric and the durable log
// ============================================================================

/// An immutable chat emission: what peers receive, what the log stores.
///
/// Serialized as `{group_id, name, message, created_at}`, the same shape the
/// `chats` table and the web client use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "group_id")]
    pub room_id: RoomId,

    #[serde(rename = "name")]
    pub sender_name: String,

    #[serde(rename = "message")]
    pub body: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ChatEvent {
    /// Bind a client frame to the session's room, stamping `created_at`
    /// when the client did not send one.
    pub fn from_frame(room_id: RoomId, frame: ChatFrame) -> Self {
        Self {
            room_id,
            sender_name: frame.sender_name,
            body: frame.body,
            created_at: frame.created_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_parses_client_payload() {
        let frame: ChatFrame = serde_json::from_str(
            r#"{"group_id":"abc","name":"Alice","message":"hi","created_at":"2024-05-01T10:00:00.000Z"}"#,
        )
        .unwrap();

        assert_eq!(frame.sender_name, "Alice");
        assert_eq!(frame.body.as_deref(), Some("hi"));
        assert_eq!(frame.group_id.as_deref(), Some("abc"));
        assert!(frame.created_at.is_some());
    }

    #[test]
    fn test_frame_allows_null_body() {
        let frame: ChatFrame = serde_json::from_str(r#"{"name":"Alice","message":null}"#).unwrap();
        assert_eq!(frame.body, None);
        assert_eq!(frame.created_at, None);
    }

    #[test]
    fn test_event_room_comes_from_session_not_frame() {
        let frame: ChatFrame =
            serde_json::from_str(r#"{"group_id":"xyz","name":"Alice","message":"hi"}"#).unwrap();
        let event = ChatEvent::from_frame(RoomId::parse("abc").unwrap(), frame);

        assert_eq!(event.room_id.as_str(), "abc");
    }

    #[test]
    fn test_event_wire_field_names() {
        let created_at = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let event = ChatEvent {
            room_id: RoomId::parse("abc").unwrap(),
            sender_name: "Alice".to_string(),
            body: Some("hi".to_string()),
            created_at,
        };

        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["group_id"], "abc");
        assert_eq!(value["name"], "Alice");
        assert_eq!(value["message"], "hi");
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn test_event_rejects_record_without_room() {
        let result = ChatEvent::from_json_bytes(br#"{"name":"Alice","message":"hi","created_at":"2024-05-01T10:00:00Z"}"#);
        assert!(result.is_err());

        let result = ChatEvent::from_json_bytes(br#"{"group_id":"  ","name":"Alice","message":"hi","created_at":"2024-05-01T10:00:00Z"}"#);
        assert!(result.is_err());
    }
}
