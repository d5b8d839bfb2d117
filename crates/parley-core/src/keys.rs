//! Deterministic names for pub/sub channels and shared-state keys.
//!
//! Any process can compute these from a room or process ID without a lookup.

use crate::ids::{ProcessId, RoomId};

/// Prefix of every per-room pub/sub channel.
pub const ROOM_CHANNEL_PREFIX: &str = "chat.room.";

/// Prefix of the per-room sequence counter key.
pub const SEQUENCE_KEY_PREFIX: &str = "chat:sequence";

/// Prefix of the per-process subscription-set key.
pub const SERVER_ROOMS_KEY_PREFIX: &str = "chat:server:rooms";

/// Channel name for a room (`chat.room.<roomId>`).
pub fn room_channel(room: RoomId) -> String {
    format!("{ROOM_CHANNEL_PREFIX}{room}")
}

/// Recover the room ID from a channel name, if it is a room channel.
pub fn room_from_channel(channel: &str) -> Option<RoomId> {
    channel.strip_prefix(ROOM_CHANNEL_PREFIX)?.parse().ok()
}

/// Sequence counter key for a room (`chat:sequence<roomId>`).
pub fn sequence_key(room: RoomId) -> String {
    format!("{SEQUENCE_KEY_PREFIX}{room}")
}

/// Subscription-set key for a process (`chat:server:rooms<processId>`).
pub fn server_rooms_key(process: &ProcessId) -> String {
    format!("{SERVER_ROOMS_KEY_PREFIX}{process}")
}
