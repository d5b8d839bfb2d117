//! WebSocket wire messages.
//!
//! Both directions are JSON objects tagged by a `type` field:
//!
//! - server → client: `CONNECTED`, `CHAT_MESSAGE`, `ERROR` ([`ServerMessage`])
//! - client → server: `SEND_MESSAGE` ([`ClientMessage`])

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ChatError, ErrorCode};
use crate::ids::{MessageId, ProcessId, RoomId, UserId};

/// Kind of chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// User-authored text.
    #[default]
    Text,
    /// System notice.
    System,
}

impl MessageType {
    /// Stable string form, as stored and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::System => "SYSTEM",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(Self::Text),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

/// A chat message as fanned out to clients and carried on the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Persisted message ID.
    pub id: MessageId,
    /// Room the message belongs to.
    pub chat_room_id: RoomId,
    /// Sender user ID.
    pub sender_id: UserId,
    /// Sender display name at send time.
    pub sender_name: String,
    /// Message kind.
    pub message_type: MessageType,
    /// Message body.
    pub content: String,
    /// Per-room sequence number; the authoritative room-local order.
    pub sequence_number: i64,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// Structured error reply sent to a single connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Human-readable description.
    pub message: String,
    /// Machine-readable code.
    pub code: Option<ErrorCode>,
    /// Room the failed request targeted, when known.
    pub chat_room_id: Option<RoomId>,
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
}

impl ErrorMessage {
    /// Build an error reply from a [`ChatError`].
    pub fn from_error(err: &ChatError, room: Option<RoomId>) -> Self {
        Self {
            message: err.to_string(),
            code: Some(err.code()),
            chat_room_id: room,
            timestamp: Utc::now(),
        }
    }
}

/// Greeting sent right after a connection is accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Authenticated user on this connection.
    pub user_id: UserId,
    /// Process that accepted the connection.
    pub process_id: ProcessId,
    /// When the connection was accepted.
    pub timestamp: DateTime<Utc>,
}

/// Server → client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Connection accepted.
    Connected(Connected),
    /// A chat message delivered by fan-out.
    ChatMessage(ChatMessage),
    /// An error for this connection only.
    Error(ErrorMessage),
}

impl ServerMessage {
    /// Serialize to the JSON text sent on the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Payload of a `SEND_MESSAGE` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target room.
    pub chat_room_id: RoomId,
    /// Message kind (defaults to `TEXT`).
    #[serde(default)]
    pub message_type: MessageType,
    /// Message body; absent is stored as empty.
    #[serde(default)]
    pub content: Option<String>,
}

/// Client → server message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Send a chat message to a room.
    SendMessage(SendMessageRequest),
}

/// Every `type` tag [`ClientMessage`] accepts.
const CLIENT_MESSAGE_TYPES: &[&str] = &["SEND_MESSAGE"];

impl ClientMessage {
    /// Parse an inbound frame.
    ///
    /// Distinguishes a frame whose `type` is not recognised
    /// ([`ErrorCode::UnknownMessageType`]) from one that is not valid JSON or
    /// does not match the shape of its type ([`ErrorCode::InvalidMessageFormat`]).
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ChatError::InvalidFormat(e.to_string()))?;
        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(ChatError::InvalidFormat("missing \"type\" field".into()));
        };
        if !CLIENT_MESSAGE_TYPES.contains(&kind) {
            return Err(ChatError::UnknownMessageType(kind.to_owned()));
        }
        serde_json::from_value(value).map_err(|e| ChatError::InvalidFormat(e.to_string()))
    }

    /// Room this request targets, used to label error replies.
    pub fn room(&self) -> RoomId {
        match self {
            Self::SendMessage(req) => req.chat_room_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
