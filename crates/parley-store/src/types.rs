//! Persisted chat entities.

use chrono::{DateTime, Utc};
use parley_core::messages::{ChatMessage, MessageType};
use parley_core::rooms::{ChatRoomType, MemberRole};
use parley_core::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Primary key.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Name shown as the message sender.
    pub display_name: String,
    /// Whether the account is enabled.
    pub is_active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// A chat room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    /// Primary key.
    pub id: RoomId,
    /// Human-readable room name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Room kind.
    #[serde(rename = "type")]
    pub room_type: ChatRoomType,
    /// Active member cap.
    pub max_members: u32,
    /// Whether the room accepts joins.
    pub is_active: bool,
    /// User who created the room.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A user's membership in a room. Leaving flips `is_active` instead of deleting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomMember {
    /// Primary key.
    pub id: i64,
    /// Room joined.
    pub room_id: RoomId,
    /// Member user.
    pub user_id: UserId,
    /// Role within the room.
    pub role: MemberRole,
    /// False once the user has left.
    pub is_active: bool,
    /// Most recent join time.
    pub joined_at: DateTime<Utc>,
    /// When the user left, if they did.
    pub left_at: Option<DateTime<Utc>>,
    /// Read marker.
    pub last_read_message_id: Option<MessageId>,
}

/// A persisted message, with the sender's display name joined in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Store-assigned ID, monotonic per store. Used as the history cursor.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Author display name.
    pub sender_name: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Body text.
    pub content: String,
    /// Per-room sequence number.
    pub sequence_number: i64,
    /// Whether the content was edited.
    pub is_edited: bool,
    /// Soft-delete flag. Deleted messages are excluded from history.
    pub is_deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Outbound representation delivered to clients.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            chat_room_id: self.room_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name.clone(),
            message_type: self.message_type,
            content: self.content.clone(),
            sequence_number: self.sequence_number,
            timestamp: self.created_at,
        }
    }
}

/// Fields for a new room.
#[derive(Clone, Debug)]
pub struct NewRoom {
    /// Room name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Room kind.
    pub room_type: ChatRoomType,
    /// Active member cap.
    pub max_members: u32,
    /// Creating user.
    pub created_by: UserId,
}

/// Fields for a new message. The sequence number is assigned before insert.
#[derive(Clone, Debug)]
pub struct NewMessage {
    /// Target room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Message kind.
    pub message_type: MessageType,
    /// Body text.
    pub content: String,
    /// Sequence number from the generator.
    pub sequence_number: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_message_converts_to_outbound() {
        let stored = StoredMessage {
            id: MessageId(9),
            room_id: RoomId(2),
            sender_id: UserId(3),
            sender_name: "Ada".into(),
            message_type: MessageType::Text,
            content: "hi".into(),
            sequence_number: 12,
            is_edited: false,
            is_deleted: false,
            created_at: Utc::now(),
        };
        let msg = stored.to_chat_message();
        assert_eq!(msg.id, MessageId(9));
        assert_eq!(msg.chat_room_id, RoomId(2));
        assert_eq!(msg.sequence_number, 12);
        assert_eq!(msg.timestamp, stored.created_at);
    }

    #[test]
    fn room_serializes_type_field() {
        let room = ChatRoom {
            id: RoomId(1),
            name: "general".into(),
            description: None,
            room_type: ChatRoomType::Group,
            max_members: 100,
            is_active: true,
            created_by: UserId(1),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["type"], "GROUP");
        assert_eq!(json["maxMembers"], 100);
    }
}
