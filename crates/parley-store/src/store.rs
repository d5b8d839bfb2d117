//! The [`ChatStore`] interface the chat core persists through.

use parley_core::rooms::MemberRole;
use parley_core::{MessageId, RoomId, UserId};

use crate::errors::Result;
use crate::types::{ChatRoom, ChatRoomMember, NewMessage, NewRoom, StoredMessage, User};

/// Persistent storage for users, rooms, memberships and messages.
///
/// Implementations are synchronous; async callers wrap calls in
/// `tokio::task::spawn_blocking` when the backend does real I/O.
pub trait ChatStore: Send + Sync {
    /// Register a user.
    fn create_user(&self, username: &str, display_name: &str) -> Result<User>;

    /// Look up a user.
    fn find_user(&self, id: UserId) -> Result<Option<User>>;

    /// Create a room.
    fn create_room(&self, room: &NewRoom) -> Result<ChatRoom>;

    /// Look up a room.
    fn find_room(&self, id: RoomId) -> Result<Option<ChatRoom>>;

    /// Active rooms whose name contains `query`.
    fn search_rooms(&self, query: &str, limit: usize) -> Result<Vec<ChatRoom>>;

    /// Active rooms `user` belongs to, at most `limit`.
    fn rooms_for_user(&self, user: UserId, limit: usize) -> Result<Vec<ChatRoom>>;

    /// Add `user` to `room`, re-activating a previous membership if one exists.
    fn add_member(&self, room: RoomId, user: UserId, role: MemberRole) -> Result<ChatRoomMember>;

    /// Mark a membership as left. Returns whether it was active.
    fn deactivate_member(&self, room: RoomId, user: UserId) -> Result<bool>;

    /// Whether `user` is an active member of `room`.
    fn is_active_member(&self, room: RoomId, user: UserId) -> Result<bool>;

    /// Number of active members of `room`.
    fn count_active_members(&self, room: RoomId) -> Result<u32>;

    /// Active memberships of `room`.
    fn active_members(&self, room: RoomId) -> Result<Vec<ChatRoomMember>>;

    /// Persist a message. The store assigns its ID.
    fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage>;

    /// Most recent non-deleted messages, newest first.
    fn latest_messages(&self, room: RoomId, limit: u32) -> Result<Vec<StoredMessage>>;

    /// Non-deleted messages with ID below `cursor`, newest first.
    fn messages_before(&self, room: RoomId, cursor: MessageId, limit: u32)
    -> Result<Vec<StoredMessage>>;

    /// Non-deleted messages with ID above `cursor`, oldest first.
    fn messages_after(&self, room: RoomId, cursor: MessageId, limit: u32)
    -> Result<Vec<StoredMessage>>;

    /// Soft-delete a message. Returns whether it was live.
    fn mark_message_deleted(&self, id: MessageId) -> Result<bool>;
}
