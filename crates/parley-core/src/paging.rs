//! Cursor-based history paging types.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId};

/// Default page size when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Paging direction relative to the cursor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageDirection {
    /// Strictly older than the cursor.
    #[default]
    Before,
    /// Strictly newer than the cursor.
    After,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

/// A history query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePageRequest {
    /// Room to read.
    pub chat_room_id: RoomId,
    /// Page boundary; absent means "most recent".
    #[serde(default)]
    pub cursor: Option<MessageId>,
    /// Requested page size; the server clamps it.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Direction relative to `cursor`.
    #[serde(default)]
    pub direction: MessageDirection,
}

impl MessagePageRequest {
    /// Most recent page of a room.
    pub fn latest(room: RoomId, limit: u32) -> Self {
        Self {
            chat_room_id: room,
            cursor: None,
            limit,
            direction: MessageDirection::Before,
        }
    }

    /// Page strictly older than `cursor`.
    pub fn before(room: RoomId, cursor: MessageId, limit: u32) -> Self {
        Self {
            chat_room_id: room,
            cursor: Some(cursor),
            limit,
            direction: MessageDirection::Before,
        }
    }

    /// Page strictly newer than `cursor`.
    pub fn after(room: RoomId, cursor: MessageId, limit: u32) -> Self {
        Self {
            chat_room_id: room,
            cursor: Some(cursor),
            limit,
            direction: MessageDirection::After,
        }
    }
}

/// One page of history, always newest-first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage<M> {
    /// Messages, newest first.
    pub messages: Vec<M>,
    /// ID of the oldest message in the page, for further `BEFORE` paging.
    pub next_cursor: Option<MessageId>,
    /// ID of the newest message in the page, for further `AFTER` paging.
    pub prev_cursor: Option<MessageId>,
    /// The page reached the limit. An approximation, not an existence check.
    pub has_next: bool,
    /// The request carried a cursor.
    pub has_prev: bool,
}
