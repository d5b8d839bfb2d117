//! Message repository: the `messages` table.
//!
//! The three history shapes backing cursor paging all skip soft-deleted rows.
//! `latest` and `before` return newest first, ordered by
//! `(sequence_number, created_at)` descending. `after` returns oldest first;
//! the caller reverses it.

use parley_core::{MessageId, RoomId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row::{MESSAGE_COLUMNS, message_from_row, now_text};
use crate::types::{NewMessage, StoredMessage};

/// Message repository.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert a message and read it back with the sender's display name.
    pub fn insert(conn: &Connection, message: &NewMessage) -> Result<StoredMessage> {
        let _ = conn.execute(
            "INSERT INTO messages (room_id, sender_id, message_type, content, sequence_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.room_id.get(),
                message.sender_id.get(),
                message.message_type.as_str(),
                message.content,
                message.sequence_number,
                now_text(),
            ],
        )?;
        let id = MessageId(conn.last_insert_rowid());
        let stored = conn.query_row(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id
                 WHERE m.id = ?1"
            ),
            params![id.get()],
            message_from_row,
        )?;
        Ok(stored)
    }

    /// Look up a message by ID, deleted or not.
    pub fn get(conn: &Connection, id: MessageId) -> Result<Option<StoredMessage>> {
        let message = conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id
                     WHERE m.id = ?1"
                ),
                params![id.get()],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    /// Most recent `limit` messages, newest first.
    pub fn latest(conn: &Connection, room: RoomId, limit: u32) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.room_id = ?1 AND m.is_deleted = 0
             ORDER BY m.sequence_number DESC, m.created_at DESC
             LIMIT ?2"
        ))?;
        let messages = stmt
            .query_map(params![room.get(), limit], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Up to `limit` messages with ID strictly below `cursor`, newest first.
    pub fn before(
        conn: &Connection,
        room: RoomId,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.room_id = ?1 AND m.id < ?2 AND m.is_deleted = 0
             ORDER BY m.sequence_number DESC, m.created_at DESC
             LIMIT ?3"
        ))?;
        let messages = stmt
            .query_map(params![room.get(), cursor.get(), limit], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Up to `limit` messages with ID strictly above `cursor`, oldest first.
    pub fn after(
        conn: &Connection,
        room: RoomId,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.room_id = ?1 AND m.id > ?2 AND m.is_deleted = 0
             ORDER BY m.sequence_number ASC, m.created_at ASC
             LIMIT ?3"
        ))?;
        let messages = stmt
            .query_map(params![room.get(), cursor.get(), limit], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Soft-delete a message. Returns whether a live message was changed.
    pub fn mark_deleted(conn: &Connection, id: MessageId) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE messages SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            params![id.get()],
        )?;
        Ok(changed > 0)
    }
}
