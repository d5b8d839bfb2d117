//! Mapping between `SQLite` column values and domain values.
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision so that
//! lexical order matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::messages::MessageType;
use parley_core::rooms::{ChatRoomType, MemberRole};
use parley_core::{MessageId, RoomId, UserId};
use rusqlite::Row;
use rusqlite::types::Type;

use crate::types::{ChatRoom, ChatRoomMember, StoredMessage, User};

pub(crate) fn time_to_text(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_text() -> String {
    time_to_text(Utc::now())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {raw:?}: {e}")))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, format!("bad timestamp {raw:?}: {e}")))
    })
    .transpose()
}

fn parsed_at<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

/// Column list matching [`user_from_row`].
pub(crate) const USER_COLUMNS: &str = "id, username, display_name, is_active, created_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        display_name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: time_at(row, 4)?,
    })
}

/// Column list matching [`room_from_row`], qualified with the `r` alias.
pub(crate) const ROOM_COLUMNS: &str = "r.id, r.name, r.description, r.room_type, r.max_members, \
     r.is_active, r.created_by, r.created_at";

pub(crate) fn room_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRoom> {
    Ok(ChatRoom {
        id: RoomId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        room_type: parsed_at::<ChatRoomType>(row, 3)?,
        max_members: row.get(4)?,
        is_active: row.get(5)?,
        created_by: UserId(row.get(6)?),
        created_at: time_at(row, 7)?,
    })
}

/// Column list matching [`member_from_row`].
pub(crate) const MEMBER_COLUMNS: &str = "id, room_id, user_id, role, is_active, joined_at, \
     left_at, last_read_message_id";

pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRoomMember> {
    Ok(ChatRoomMember {
        id: row.get(0)?,
        room_id: RoomId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        role: parsed_at::<MemberRole>(row, 3)?,
        is_active: row.get(4)?,
        joined_at: time_at(row, 5)?,
        left_at: opt_time_at(row, 6)?,
        last_read_message_id: row.get::<_, Option<i64>>(7)?.map(MessageId),
    })
}

/// Column list matching [`message_from_row`]; expects `messages m JOIN users u`.
pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.sender_id, u.display_name, \
     m.message_type, m.content, m.sequence_number, m.is_edited, m.is_deleted, m.created_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let raw_type: String = row.get(4)?;
    let message_type = MessageType::parse(&raw_type)
        .ok_or_else(|| conversion_error(4, format!("unknown message type {raw_type:?}")))?;
    Ok(StoredMessage {
        id: MessageId(row.get(0)?),
        room_id: RoomId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        sender_name: row.get(3)?,
        message_type,
        content: row.get(5)?,
        sequence_number: row.get(6)?,
        is_edited: row.get(7)?,
        is_deleted: row.get(8)?,
        created_at: time_at(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexically() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.000001Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.000010Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(time_to_text(early) < time_to_text(late));
    }
}
