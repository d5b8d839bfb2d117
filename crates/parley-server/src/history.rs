//! Cursor-paged message history.
//!
//! Stateless: each request carries its own cursor. Every page comes back
//! newest-first whatever the direction, so pages can be concatenated.

use parley_core::messages::ChatMessage;
use parley_core::paging::{MessageDirection, MessagePage, MessagePageRequest};
use parley_core::{ChatError, UserId};
use parley_store::{ChatStore, StoredMessage};
use tracing::debug;

/// Page size limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Used when the request does not ask for a size.
    pub default_limit: u32,
    /// Hard maximum, applied whatever the client asks for.
    pub max_limit: u32,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

impl HistoryLimits {
    /// Effective page size for a requested limit. `0` means the default.
    pub fn clamp(&self, requested: u32) -> u32 {
        let max = self.max_limit.max(1);
        let wanted = if requested == 0 {
            self.default_limit
        } else {
            requested
        };
        wanted.clamp(1, max)
    }
}

/// Fetch one page of `request.chat_room_id` for `caller`.
///
/// The caller must be an active member of the room.
pub fn fetch_page(
    store: &dyn ChatStore,
    request: &MessagePageRequest,
    caller: UserId,
    limits: HistoryLimits,
) -> Result<MessagePage<ChatMessage>, ChatError> {
    let room = request.chat_room_id;
    if !store.is_active_member(room, caller)? {
        return Err(ChatError::NotMember { room, user: caller });
    }

    let limit = limits.clamp(request.limit);
    let rows = match (request.cursor, request.direction) {
        (None, _) => store.latest_messages(room, limit)?,
        (Some(cursor), MessageDirection::Before) => store.messages_before(room, cursor, limit)?,
        (Some(cursor), MessageDirection::After) => {
            let mut rows = store.messages_after(room, cursor, limit)?;
            rows.reverse();
            rows
        }
    };
    let messages: Vec<ChatMessage> = rows.iter().map(StoredMessage::to_chat_message).collect();
    debug!(%room, user_id = %caller, limit, returned = messages.len(), "history page");

    Ok(MessagePage {
        next_cursor: messages.last().map(|m| m.id),
        prev_cursor: messages.first().map(|m| m.id),
        has_next: messages.len() == limit as usize,
        has_prev: request.cursor.is_some(),
        messages,
    })
}
